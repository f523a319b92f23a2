use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::domain::{
    repositories::users::UserRepository,
    value_objects::subscriptions::{ExpiredSubscriptionsDto, ExpiredUserDto, SubscriptionStats},
};

pub struct SubscriptionExpiryUseCase<R>
where
    R: UserRepository + Send + Sync + 'static,
{
    user_repo: Arc<R>,
}

impl<R> SubscriptionExpiryUseCase<R>
where
    R: UserRepository + Send + Sync + 'static,
{
    pub fn new(user_repo: Arc<R>) -> Self {
        Self { user_repo }
    }

    /// One sweep pass. The read happens before the update so the response
    /// can name who was expired; rows qualifying between the two statements
    /// are picked up by the next run.
    pub async fn run(&self) -> Result<ExpiredSubscriptionsDto> {
        let now = Utc::now();

        let overdue = self.user_repo.list_overdue_active(now).await?;
        if overdue.is_empty() {
            info!("subscription_expiry: no subscriptions to expire");
            return Ok(ExpiredSubscriptionsDto {
                expired: 0,
                users: Vec::new(),
            });
        }

        let users: Vec<ExpiredUserDto> = overdue.iter().map(ExpiredUserDto::from).collect();
        let expired = self.user_repo.expire_overdue_active(now).await?;

        info!(
            expired,
            captured = users.len(),
            "subscription_expiry: expired overdue subscriptions"
        );

        Ok(ExpiredSubscriptionsDto { expired, users })
    }

    pub async fn stats(&self) -> Result<SubscriptionStats> {
        let now = Utc::now();
        let stats = self.user_repo.subscription_stats(now).await?;

        info!(
            active = stats.active,
            expired = stats.expired,
            expiring_soon = stats.expiring_soon,
            total = stats.total,
            "subscription_expiry: stats computed"
        );

        Ok(stats)
    }
}
