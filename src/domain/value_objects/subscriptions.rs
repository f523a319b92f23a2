use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::entities::users::UserEntity;

/// Snapshot of a user captured before the expiry sweep updates the row.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpiredUserDto {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub expiry_date: Option<DateTime<Utc>>,
}

impl From<&UserEntity> for ExpiredUserDto {
    fn from(user: &UserEntity) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            expiry_date: user.subscription_expiry_date,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExpiredSubscriptionsDto {
    pub expired: usize,
    pub users: Vec<ExpiredUserDto>,
}

/// Independent counts; each comes from its own query, so small skew under
/// concurrent writes is expected.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStats {
    pub active: i64,
    pub expired: i64,
    pub expiring_soon: i64,
    pub total: i64,
}
