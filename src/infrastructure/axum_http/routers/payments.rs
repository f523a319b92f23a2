use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    application::usecases::payments::{PaymentUseCase, StripeGateway},
    config::config_model::DotEnvyConfig,
    domain::{
        repositories::users::UserRepository,
        value_objects::payments::{CreateCheckoutSessionModel, VerifySessionModel},
    },
    infrastructure::{
        axum_http::error_responses::error_response,
        postgres::{postgres_connection::PgPoolSquad, repositories::users::UserPostgres},
        stripe::stripe_client::StripeClient,
    },
};

pub fn routes(db_pool: Arc<PgPoolSquad>, config: Arc<DotEnvyConfig>) -> Router {
    let user_repository = UserPostgres::new(Arc::clone(&db_pool));
    let stripe_client = StripeClient::new(
        config.stripe.secret_key.clone(),
        config.stripe.webhook_secret.clone(),
        config.stripe.success_url.clone(),
        config.stripe.cancel_url.clone(),
    );
    let payments_usecase = PaymentUseCase::new(
        Arc::new(user_repository),
        Arc::new(stripe_client),
        config.subscription.term_days,
    );

    Router::new()
        .route("/create-checkout-session", post(create_checkout_session))
        .route("/webhook", post(stripe_webhook))
        .route("/status/:user_id", get(payment_status))
        .route("/verify-session", post(verify_session))
        .with_state(Arc::new(payments_usecase))
}

pub async fn create_checkout_session<R, S>(
    State(payments_usecase): State<Arc<PaymentUseCase<R, S>>>,
    Json(model): Json<CreateCheckoutSessionModel>,
) -> impl IntoResponse
where
    R: UserRepository + Send + Sync + 'static,
    S: StripeGateway + Send + Sync + 'static,
{
    match payments_usecase.create_checkout_session(model).await {
        Ok(session) => Json(json!({
            "message": "Checkout session created",
            "sessionId": session.session_id,
            "url": session.url,
        }))
        .into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn stripe_webhook<R, S>(
    State(payments_usecase): State<Arc<PaymentUseCase<R, S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse
where
    R: UserRepository + Send + Sync + 'static,
    S: StripeGateway + Send + Sync + 'static,
{
    let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
    else {
        return error_response(
            axum::http::StatusCode::BAD_REQUEST,
            "stripe-signature header is required",
        );
    };

    match payments_usecase.handle_webhook(&body, signature).await {
        Ok(()) => Json(json!({ "received": true })).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn payment_status<R, S>(
    State(payments_usecase): State<Arc<PaymentUseCase<R, S>>>,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse
where
    R: UserRepository + Send + Sync + 'static,
    S: StripeGateway + Send + Sync + 'static,
{
    match payments_usecase.get_payment_status(user_id).await {
        Ok(user) => Json(json!({
            "message": "Payment status retrieved",
            "user": user,
        }))
        .into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn verify_session<R, S>(
    State(payments_usecase): State<Arc<PaymentUseCase<R, S>>>,
    Json(model): Json<VerifySessionModel>,
) -> impl IntoResponse
where
    R: UserRepository + Send + Sync + 'static,
    S: StripeGateway + Send + Sync + 'static,
{
    match payments_usecase.verify_session(model).await {
        Ok(result) => Json(json!({
            "paid": result.paid,
            "sessionId": result.session_id,
        }))
        .into_response(),
        Err(err) => err.into_response(),
    }
}
