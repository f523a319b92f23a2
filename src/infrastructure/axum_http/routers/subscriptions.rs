use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tracing::error;

use crate::{
    application::usecases::subscription_expiry::SubscriptionExpiryUseCase,
    domain::repositories::users::UserRepository,
    infrastructure::{
        axum_http::error_responses::error_response,
        postgres::{postgres_connection::PgPoolSquad, repositories::users::UserPostgres},
    },
};

pub fn routes(db_pool: Arc<PgPoolSquad>) -> Router {
    let user_repository = UserPostgres::new(Arc::clone(&db_pool));
    let expiry_usecase = SubscriptionExpiryUseCase::new(Arc::new(user_repository));

    Router::new()
        .route("/expire", post(expire_subscriptions))
        .route("/stats", get(subscription_stats))
        .with_state(Arc::new(expiry_usecase))
}

/// Sweep trigger. The host scheduler (cron or equivalent) posts here on its
/// own interval; the handler itself is stateless so multiple instances stay
/// safe to run behind one scheduler.
pub async fn expire_subscriptions<R>(
    State(expiry_usecase): State<Arc<SubscriptionExpiryUseCase<R>>>,
) -> impl IntoResponse
where
    R: UserRepository + Send + Sync + 'static,
{
    match expiry_usecase.run().await {
        Ok(result) => Json(json!({
            "message": "Subscription expiration check completed",
            "expired": result.expired,
            "users": result.users,
        }))
        .into_response(),
        Err(err) => {
            error!(error = ?err, "subscription_expiry: sweep failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to expire subscriptions",
            )
        }
    }
}

pub async fn subscription_stats<R>(
    State(expiry_usecase): State<Arc<SubscriptionExpiryUseCase<R>>>,
) -> impl IntoResponse
where
    R: UserRepository + Send + Sync + 'static,
{
    match expiry_usecase.stats().await {
        Ok(stats) => Json(json!({ "stats": stats })).into_response(),
        Err(err) => {
            error!(error = ?err, "subscription_expiry: stats query failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load subscription stats",
            )
        }
    }
}
