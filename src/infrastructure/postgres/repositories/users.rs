use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::{OptionalExtension, RunQueryDsl, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{
        entities::users::UserEntity,
        repositories::users::UserRepository,
        value_objects::{
            enums::subscription_statuses::SubscriptionStatus,
            subscriptions::SubscriptionStats,
        },
    },
    infrastructure::postgres::{postgres_connection::PgPoolSquad, schema::users},
};

const EXPIRING_SOON_WINDOW_DAYS: i64 = 7;

pub struct UserPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl UserPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UserRepository for UserPostgres {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = users::table
            .filter(users::id.eq(user_id))
            .select(UserEntity::as_select())
            .first::<UserEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn set_stripe_customer_id(&self, user_id: Uuid, customer_ref: &str) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let affected = update(users::table.filter(users::id.eq(user_id)))
            .set((
                users::stripe_customer_id.eq(customer_ref),
                users::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        if affected == 0 {
            anyhow::bail!("user {} not found while persisting customer id", user_id);
        }

        Ok(())
    }

    async fn activate_subscription_if_unpaid(
        &self,
        user_id: Uuid,
        paid_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        // Compare-and-set on the payment flag: concurrent webhook and
        // verify-session deliveries for the same payment apply at most once.
        let affected = update(
            users::table
                .filter(users::id.eq(user_id))
                .filter(users::payment_status.eq(false)),
        )
        .set((
            users::payment_status.eq(true),
            users::payment_date.eq(Some(paid_at)),
            users::subscription_status.eq(SubscriptionStatus::Active.to_string()),
            users::subscription_expiry_date.eq(Some(expires_at)),
            users::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

        Ok(affected > 0)
    }

    async fn list_overdue_active(&self, now: DateTime<Utc>) -> Result<Vec<UserEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let results = users::table
            .filter(users::subscription_status.eq(SubscriptionStatus::Active.to_string()))
            .filter(users::subscription_expiry_date.le(now))
            .select(UserEntity::as_select())
            .load::<UserEntity>(&mut conn)?;

        Ok(results)
    }

    async fn expire_overdue_active(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        // subscription_expiry_date stays untouched as a historical record.
        let affected = update(
            users::table
                .filter(users::subscription_status.eq(SubscriptionStatus::Active.to_string()))
                .filter(users::subscription_expiry_date.le(now)),
        )
        .set((
            users::subscription_status.eq(SubscriptionStatus::Expired.to_string()),
            users::payment_status.eq(false),
            users::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

        Ok(affected)
    }

    async fn subscription_stats(&self, now: DateTime<Utc>) -> Result<SubscriptionStats> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let active_status = SubscriptionStatus::Active.to_string();
        let expired_status = SubscriptionStatus::Expired.to_string();
        let soon = now + Duration::days(EXPIRING_SOON_WINDOW_DAYS);

        let active = users::table
            .filter(users::subscription_status.eq(&active_status))
            .filter(users::subscription_expiry_date.gt(now))
            .count()
            .get_result::<i64>(&mut conn)?;

        let expired = users::table
            .filter(users::subscription_status.eq(&expired_status))
            .count()
            .get_result::<i64>(&mut conn)?;

        let expiring_soon = users::table
            .filter(users::subscription_status.eq(&active_status))
            .filter(users::subscription_expiry_date.gt(now))
            .filter(users::subscription_expiry_date.le(soon))
            .count()
            .get_result::<i64>(&mut conn)?;

        let total = users::table
            .filter(users::subscription_status.eq_any([&active_status, &expired_status]))
            .count()
            .get_result::<i64>(&mut conn)?;

        Ok(SubscriptionStats {
            active,
            expired,
            expiring_soon,
            total,
        })
    }
}
