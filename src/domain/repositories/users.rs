use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::users::UserEntity;
use crate::domain::value_objects::subscriptions::SubscriptionStats;

#[automock]
#[async_trait]
pub trait UserRepository {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserEntity>>;

    async fn set_stripe_customer_id(&self, user_id: Uuid, customer_ref: &str) -> Result<()>;

    /// Conditional activation: flips the payment flag, stamps the payment
    /// date and moves the subscription to active with the given expiry, but
    /// only when the user is not already marked paid. Returns whether a row
    /// was changed, so double delivery of the same payment is a no-op.
    async fn activate_subscription_if_unpaid(
        &self,
        user_id: Uuid,
        paid_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Active subscriptions whose expiry date has passed, read before the
    /// sweep update so callers can report who was affected.
    async fn list_overdue_active(&self, now: DateTime<Utc>) -> Result<Vec<UserEntity>>;

    /// Single conditional UPDATE moving every overdue active subscription to
    /// expired and clearing the payment flag. The expiry date is left as a
    /// historical record. Returns the number of rows changed.
    async fn expire_overdue_active(&self, now: DateTime<Utc>) -> Result<usize>;

    async fn subscription_stats(&self, now: DateTime<Utc>) -> Result<SubscriptionStats>;
}
