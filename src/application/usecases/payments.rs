use std::{collections::HashMap, sync::Arc};

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        repositories::users::UserRepository,
        value_objects::payments::{
            CheckoutSessionDto, CreateCheckoutSessionModel, PaymentStatusDto, VerifySessionDto,
            VerifySessionModel,
        },
    },
    infrastructure::stripe::stripe_client::{
        CreatedCheckoutSession, StripeCheckoutSession, StripeClient, StripeEvent,
    },
};

const DEFAULT_CURRENCY: &str = "usd";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StripeGateway: Send + Sync {
    async fn create_customer(&self, email: &str, name: &str, user_id: Uuid) -> AnyResult<String>;

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        currency: &str,
        unit_amount: i64,
        metadata: HashMap<String, String>,
    ) -> AnyResult<CreatedCheckoutSession>;

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> AnyResult<Option<StripeCheckoutSession>>;

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> AnyResult<StripeEvent>;
}

#[async_trait]
impl StripeGateway for StripeClient {
    async fn create_customer(&self, email: &str, name: &str, user_id: Uuid) -> AnyResult<String> {
        self.create_customer(email, name, user_id).await
    }

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        currency: &str,
        unit_amount: i64,
        metadata: HashMap<String, String>,
    ) -> AnyResult<CreatedCheckoutSession> {
        self.create_checkout_session(customer_id, currency, unit_amount, metadata)
            .await
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> AnyResult<Option<StripeCheckoutSession>> {
        self.retrieve_checkout_session(session_id).await
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> AnyResult<StripeEvent> {
        self.verify_webhook_signature(payload, signature)
    }
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("amount must be a positive number")]
    InvalidAmount,
    #[error("user not found")]
    UserNotFound,
    #[error("checkout session not found")]
    SessionNotFound,
    #[error("webhook signature verification failed")]
    InvalidWebhookSignature,
    #[error("payment provider request failed")]
    Upstream(#[source] anyhow::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PaymentError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            PaymentError::MissingField(_)
            | PaymentError::InvalidAmount
            | PaymentError::InvalidWebhookSignature => StatusCode::BAD_REQUEST,
            PaymentError::UserNotFound | PaymentError::SessionNotFound => StatusCode::NOT_FOUND,
            PaymentError::Upstream(_) => StatusCode::BAD_GATEWAY,
            PaymentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, PaymentError>;

pub struct PaymentUseCase<R, S>
where
    R: UserRepository + Send + Sync + 'static,
    S: StripeGateway + Send + Sync + 'static,
{
    user_repo: Arc<R>,
    stripe_client: Arc<S>,
    subscription_term_days: i64,
}

impl<R, S> PaymentUseCase<R, S>
where
    R: UserRepository + Send + Sync + 'static,
    S: StripeGateway + Send + Sync + 'static,
{
    pub fn new(user_repo: Arc<R>, stripe_client: Arc<S>, subscription_term_days: i64) -> Self {
        Self {
            user_repo,
            stripe_client,
            subscription_term_days,
        }
    }

    pub async fn create_checkout_session(
        &self,
        model: CreateCheckoutSessionModel,
    ) -> UseCaseResult<CheckoutSessionDto> {
        let user_id = model.user_id.ok_or(PaymentError::MissingField("userId"))?;
        let amount = model.amount.ok_or(PaymentError::MissingField("amount"))?;
        if !amount.is_finite() || amount <= 0.0 {
            return Err(PaymentError::InvalidAmount);
        }
        let currency = model
            .currency
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        let user = self
            .user_repo
            .find_by_id(user_id)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "payments: failed to load user for checkout");
                PaymentError::Internal(err)
            })?
            .ok_or(PaymentError::UserNotFound)?;

        let customer_id = match user.stripe_customer_id.clone() {
            Some(existing) => existing,
            None => {
                let customer_id = self
                    .stripe_client
                    .create_customer(&user.email, &user.username, user_id)
                    .await
                    .map_err(|err| {
                        error!(%user_id, error = ?err, "payments: stripe customer creation failed");
                        PaymentError::Upstream(err)
                    })?;

                // Persist before opening the session; failing the request is
                // better than leaking a customer id we can never find again.
                self.user_repo
                    .set_stripe_customer_id(user_id, &customer_id)
                    .await
                    .map_err(|err| {
                        error!(
                            %user_id,
                            customer_id = %customer_id,
                            db_error = ?err,
                            "payments: failed to persist new stripe customer id"
                        );
                        PaymentError::Internal(err)
                    })?;

                info!(%user_id, customer_id = %customer_id, "payments: stripe customer created");
                customer_id
            }
        };

        // Stripe prices in minor units; round covers fractional cents.
        let unit_amount = (amount * 100.0).round() as i64;
        let metadata = HashMap::from([("user_id".to_string(), user_id.to_string())]);

        let session = self
            .stripe_client
            .create_checkout_session(&customer_id, &currency, unit_amount, metadata)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    customer_id = %customer_id,
                    unit_amount,
                    error = ?err,
                    "payments: stripe checkout session creation failed"
                );
                PaymentError::Upstream(err)
            })?;

        info!(
            %user_id,
            session_id = %session.id,
            unit_amount,
            currency = %currency,
            "payments: checkout session created"
        );

        Ok(CheckoutSessionDto {
            session_id: session.id,
            url: session.url,
        })
    }

    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> UseCaseResult<()> {
        let event = self
            .stripe_client
            .verify_webhook_signature(payload, signature)
            .map_err(|err| {
                warn!(error = %err, "payments: webhook signature verification failed");
                PaymentError::InvalidWebhookSignature
            })?;

        info!(event_type = %event.type_, event_id = ?event.id, "payments: stripe webhook verified");

        match event.type_.as_str() {
            "checkout.session.completed" => {
                let Some(session) = StripeClient::extract_checkout_session(&event) else {
                    warn!("payments: checkout.session.completed without a parsable session");
                    return Ok(());
                };

                let Some(user_id) = session.user_id() else {
                    // Nothing to reconcile against; ack so Stripe stops retrying.
                    warn!(
                        session_id = ?session.id,
                        "payments: checkout session has no user_id metadata, skipping"
                    );
                    return Ok(());
                };

                self.reconcile_paid_session(user_id).await?;
            }
            _ => {
                debug!(event_type = %event.type_, "payments: unhandled stripe event type");
            }
        }

        Ok(())
    }

    pub async fn verify_session(
        &self,
        model: VerifySessionModel,
    ) -> UseCaseResult<VerifySessionDto> {
        let session_id = model
            .session_id
            .filter(|id| !id.is_empty())
            .ok_or(PaymentError::MissingField("sessionId"))?;

        let session = self
            .stripe_client
            .retrieve_checkout_session(&session_id)
            .await
            .map_err(|err| {
                error!(session_id = %session_id, error = ?err, "payments: session retrieval failed");
                PaymentError::Upstream(err)
            })?
            .ok_or(PaymentError::SessionNotFound)?;

        if !session.is_paid() {
            info!(session_id = %session_id, "payments: session verified, not paid yet");
            return Ok(VerifySessionDto {
                paid: false,
                session_id,
            });
        }

        if let Some(user_id) = session.user_id() {
            self.reconcile_paid_session(user_id).await?;
        } else {
            warn!(session_id = %session_id, "payments: paid session has no user_id metadata");
        }

        Ok(VerifySessionDto {
            paid: true,
            session_id,
        })
    }

    pub async fn get_payment_status(&self, user_id: Uuid) -> UseCaseResult<PaymentStatusDto> {
        let user = self
            .user_repo
            .find_by_id(user_id)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "payments: failed to load payment status");
                PaymentError::Internal(err)
            })?
            .ok_or(PaymentError::UserNotFound)?;

        Ok(PaymentStatusDto::from(user))
    }

    /// The single activation path shared by the webhook and the
    /// verify-session poll. The conditional update in the repository makes
    /// double delivery harmless: whichever path lands first wins, the other
    /// becomes a no-op.
    async fn reconcile_paid_session(&self, user_id: Uuid) -> UseCaseResult<()> {
        let paid_at = Utc::now();
        let expires_at = paid_at + Duration::days(self.subscription_term_days);

        let applied = self
            .user_repo
            .activate_subscription_if_unpaid(user_id, paid_at, expires_at)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "payments: failed to activate subscription");
                PaymentError::Internal(err)
            })?;

        if applied {
            info!(
                %user_id,
                expires_at = %expires_at,
                "payments: payment confirmed, subscription activated"
            );
        } else {
            debug!(%user_id, "payments: payment already recorded, skipping");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::users::UserEntity;
    use crate::domain::repositories::users::MockUserRepository;
    use crate::infrastructure::stripe::stripe_client::StripeEventData;
    use mockall::Sequence;
    use mockall::predicate::eq;
    use serde_json::json;

    fn user_fixture(customer_id: Option<&str>) -> UserEntity {
        UserEntity {
            id: Uuid::parse_str("3fa5d25a-6a1c-4bfb-a9a6-5c5f7f3a2a01").unwrap(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            stripe_customer_id: customer_id.map(|id| id.to_string()),
            payment_status: false,
            payment_date: None,
            subscription_status: "none".to_string(),
            subscription_expiry_date: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn completed_event(object: serde_json::Value) -> StripeEvent {
        StripeEvent {
            id: Some("evt_123".to_string()),
            type_: "checkout.session.completed".to_string(),
            created: Some(1_700_000_000),
            data: StripeEventData { object },
        }
    }

    #[tokio::test]
    async fn first_checkout_creates_customer_and_persists_it_before_session() {
        let user = user_fixture(None);
        let user_id = user.id;
        let mut seq = Sequence::new();

        let mut repo = MockUserRepository::new();
        let mut gateway = MockStripeGateway::new();

        repo.expect_find_by_id()
            .with(eq(user_id))
            .times(1)
            .returning(move |_| Ok(Some(user.clone())));

        gateway
            .expect_create_customer()
            .withf(move |email, name, id| {
                email == "alice@example.com" && name == "alice" && *id == user_id
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok("cus_new".to_string()));

        repo.expect_set_stripe_customer_id()
            .withf(move |id, customer| *id == user_id && customer == "cus_new")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        gateway
            .expect_create_checkout_session()
            .withf(|customer, _, _, metadata| {
                customer == "cus_new" && metadata.contains_key("user_id")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| {
                Ok(CreatedCheckoutSession {
                    id: "cs_test_1".to_string(),
                    url: "https://checkout.stripe.com/c/pay/cs_test_1".to_string(),
                })
            });

        let usecase = PaymentUseCase::new(Arc::new(repo), Arc::new(gateway), 30);
        let dto = usecase
            .create_checkout_session(CreateCheckoutSessionModel {
                user_id: Some(user_id),
                amount: Some(10.0),
                currency: None,
            })
            .await
            .unwrap();

        assert_eq!(dto.session_id, "cs_test_1");
    }

    #[tokio::test]
    async fn second_checkout_reuses_stored_customer_id() {
        let user = user_fixture(Some("cus_existing"));
        let user_id = user.id;

        let mut repo = MockUserRepository::new();
        let mut gateway = MockStripeGateway::new();

        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(user.clone())));
        gateway.expect_create_customer().never();
        repo.expect_set_stripe_customer_id().never();

        gateway
            .expect_create_checkout_session()
            .withf(|customer, _, _, _| customer == "cus_existing")
            .times(1)
            .returning(|_, _, _, _| {
                Ok(CreatedCheckoutSession {
                    id: "cs_test_2".to_string(),
                    url: "https://checkout.stripe.com/c/pay/cs_test_2".to_string(),
                })
            });

        let usecase = PaymentUseCase::new(Arc::new(repo), Arc::new(gateway), 30);
        usecase
            .create_checkout_session(CreateCheckoutSessionModel {
                user_id: Some(user_id),
                amount: Some(5.0),
                currency: Some("eur".to_string()),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn amount_is_converted_to_rounded_minor_units() {
        let user = user_fixture(Some("cus_existing"));
        let user_id = user.id;

        let mut repo = MockUserRepository::new();
        let mut gateway = MockStripeGateway::new();

        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(user.clone())));
        gateway
            .expect_create_checkout_session()
            .withf(|_, currency, unit_amount, _| currency == "usd" && *unit_amount == 1999)
            .times(1)
            .returning(|_, _, _, _| {
                Ok(CreatedCheckoutSession {
                    id: "cs_test_3".to_string(),
                    url: "https://checkout.stripe.com/c/pay/cs_test_3".to_string(),
                })
            });

        let usecase = PaymentUseCase::new(Arc::new(repo), Arc::new(gateway), 30);
        usecase
            .create_checkout_session(CreateCheckoutSessionModel {
                user_id: Some(user_id),
                amount: Some(19.99),
                currency: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn checkout_rejects_missing_fields_and_unknown_users() {
        let mut repo = MockUserRepository::new();
        repo.expect_find_by_id().returning(|_| Ok(None));
        let gateway = MockStripeGateway::new();
        let usecase = PaymentUseCase::new(Arc::new(repo), Arc::new(gateway), 30);

        let err = usecase
            .create_checkout_session(CreateCheckoutSessionModel {
                user_id: None,
                amount: Some(10.0),
                currency: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);

        let err = usecase
            .create_checkout_session(CreateCheckoutSessionModel {
                user_id: Some(Uuid::new_v4()),
                amount: Some(-3.0),
                currency: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidAmount));

        let err = usecase
            .create_checkout_session(CreateCheckoutSessionModel {
                user_id: Some(Uuid::new_v4()),
                amount: Some(10.0),
                currency: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_webhook_signature_never_touches_the_store() {
        let mut repo = MockUserRepository::new();
        repo.expect_activate_subscription_if_unpaid().never();

        let mut gateway = MockStripeGateway::new();
        gateway
            .expect_verify_webhook_signature()
            .returning(|_, _| Err(anyhow::anyhow!("invalid webhook signature")));

        let usecase = PaymentUseCase::new(Arc::new(repo), Arc::new(gateway), 30);
        let err = usecase
            .handle_webhook(b"{}", "t=1,v1=deadbeef")
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::InvalidWebhookSignature));
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_then_verify_applies_activation_at_most_once() {
        let user_id = Uuid::parse_str("3fa5d25a-6a1c-4bfb-a9a6-5c5f7f3a2a01").unwrap();
        let session_object = json!({
            "id": "cs_test_9",
            "payment_status": "paid",
            "metadata": { "user_id": user_id.to_string() }
        });

        let mut repo = MockUserRepository::new();
        // First delivery lands, second is the conditional-update no-op.
        repo.expect_activate_subscription_if_unpaid()
            .with(eq(user_id), mockall::predicate::always(), mockall::predicate::always())
            .times(1)
            .returning(|_, _, _| Ok(true));
        repo.expect_activate_subscription_if_unpaid()
            .times(1)
            .returning(|_, _, _| Ok(false));

        let mut gateway = MockStripeGateway::new();
        let webhook_object = session_object.clone();
        gateway
            .expect_verify_webhook_signature()
            .returning(move |_, _| Ok(completed_event(webhook_object.clone())));
        gateway
            .expect_retrieve_checkout_session()
            .with(eq("cs_test_9"))
            .returning(move |_| {
                Ok(Some(
                    serde_json::from_value(session_object.clone()).unwrap(),
                ))
            });

        let usecase = PaymentUseCase::new(Arc::new(repo), Arc::new(gateway), 30);

        usecase.handle_webhook(b"{}", "t=1,v1=ok").await.unwrap();

        let dto = usecase
            .verify_session(VerifySessionModel {
                session_id: Some("cs_test_9".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(
            dto,
            VerifySessionDto {
                paid: true,
                session_id: "cs_test_9".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn webhook_without_user_metadata_is_acknowledged_without_effect() {
        let mut repo = MockUserRepository::new();
        repo.expect_activate_subscription_if_unpaid().never();

        let mut gateway = MockStripeGateway::new();
        gateway.expect_verify_webhook_signature().returning(|_, _| {
            Ok(completed_event(json!({
                "id": "cs_test_4",
                "payment_status": "paid",
                "metadata": {}
            })))
        });

        let usecase = PaymentUseCase::new(Arc::new(repo), Arc::new(gateway), 30);
        usecase.handle_webhook(b"{}", "t=1,v1=ok").await.unwrap();
    }

    #[tokio::test]
    async fn unknown_event_types_are_acknowledged_without_effect() {
        let mut repo = MockUserRepository::new();
        repo.expect_activate_subscription_if_unpaid().never();

        let mut gateway = MockStripeGateway::new();
        gateway.expect_verify_webhook_signature().returning(|_, _| {
            Ok(StripeEvent {
                id: Some("evt_900".to_string()),
                type_: "payment_intent.succeeded".to_string(),
                created: None,
                data: StripeEventData { object: json!({}) },
            })
        });

        let usecase = PaymentUseCase::new(Arc::new(repo), Arc::new(gateway), 30);
        usecase.handle_webhook(b"{}", "t=1,v1=ok").await.unwrap();
    }

    #[tokio::test]
    async fn unpaid_session_verifies_as_not_paid_without_mutation() {
        let mut repo = MockUserRepository::new();
        repo.expect_activate_subscription_if_unpaid().never();

        let mut gateway = MockStripeGateway::new();
        gateway
            .expect_retrieve_checkout_session()
            .returning(|_| {
                Ok(Some(
                    serde_json::from_value(json!({
                        "id": "cs_test_5",
                        "payment_status": "unpaid",
                        "metadata": { "user_id": "3fa5d25a-6a1c-4bfb-a9a6-5c5f7f3a2a01" }
                    }))
                    .unwrap(),
                ))
            });

        let usecase = PaymentUseCase::new(Arc::new(repo), Arc::new(gateway), 30);
        let dto = usecase
            .verify_session(VerifySessionModel {
                session_id: Some("cs_test_5".to_string()),
            })
            .await
            .unwrap();

        assert!(!dto.paid);
    }

    #[tokio::test]
    async fn verify_unknown_session_is_not_found_rather_than_unpaid() {
        let repo = MockUserRepository::new();
        let mut gateway = MockStripeGateway::new();
        gateway
            .expect_retrieve_checkout_session()
            .returning(|_| Ok(None));

        let usecase = PaymentUseCase::new(Arc::new(repo), Arc::new(gateway), 30);
        let err = usecase
            .verify_session(VerifySessionModel {
                session_id: Some("cs_missing".to_string()),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::SessionNotFound));
        assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn verify_without_session_id_is_rejected() {
        let repo = MockUserRepository::new();
        let gateway = MockStripeGateway::new();
        let usecase = PaymentUseCase::new(Arc::new(repo), Arc::new(gateway), 30);

        let err = usecase
            .verify_session(VerifySessionModel { session_id: None })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn store_failure_during_webhook_surfaces_as_internal_error() {
        let user_id = Uuid::new_v4();

        let mut repo = MockUserRepository::new();
        repo.expect_activate_subscription_if_unpaid()
            .returning(|_, _, _| Err(anyhow::anyhow!("store unavailable")));

        let mut gateway = MockStripeGateway::new();
        gateway.expect_verify_webhook_signature().returning(move |_, _| {
            Ok(completed_event(json!({
                "id": "cs_test_6",
                "payment_status": "paid",
                "metadata": { "user_id": user_id.to_string() }
            })))
        });

        let usecase = PaymentUseCase::new(Arc::new(repo), Arc::new(gateway), 30);
        let err = usecase.handle_webhook(b"{}", "t=1,v1=ok").await.unwrap_err();

        // 500 back to Stripe so it redelivers.
        assert_eq!(
            err.status_code(),
            axum::http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
