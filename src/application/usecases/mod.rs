pub mod payments;
pub mod subscription_expiry;
