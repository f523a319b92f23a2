use std::collections::HashMap;

use anyhow::Result;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use sha2::Sha256;
use tracing::error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Minimal Stripe client built on reqwest.
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
    success_url: String,
    cancel_url: String,
}

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    pub created: Option<i64>,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// Checkout session as returned by the sessions API and inside
/// `checkout.session.completed` events.
#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: Option<String>,
    pub url: Option<String>,
    pub customer: Option<String>,
    pub payment_status: Option<String>,
    pub amount_total: Option<i64>,
    pub metadata: Option<HashMap<String, String>>,
}

impl StripeCheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get("user_id"))
            .and_then(|value| Uuid::parse_str(value).ok())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedCheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

impl StripeClient {
    pub fn new(
        secret_key: String,
        webhook_secret: String,
        success_url: String,
        cancel_url: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key,
            webhook_secret,
            success_url,
            cancel_url,
        }
    }

    async fn ensure_success(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let body = resp.text().await.unwrap_or_default();
        let details = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .map(|envelope| envelope.error)
            .ok();

        error!(
            status = %status,
            stripe_request_id = ?request_id,
            stripe_error_type = ?details.as_ref().and_then(|d| d.type_.as_deref()),
            stripe_error_code = ?details.as_ref().and_then(|d| d.code.as_deref()),
            stripe_error_message = ?details.as_ref().and_then(|d| d.message.as_deref()),
            context = %context,
            "stripe api request failed"
        );

        anyhow::bail!(
            "Stripe API request failed: {} (status {}, request_id={:?})",
            context,
            status,
            request_id
        );
    }

    /// Creates a Stripe customer tagged with the user id so events can be
    /// correlated back later. https://stripe.com/docs/api/customers/create
    pub async fn create_customer(&self, email: &str, name: &str, user_id: Uuid) -> Result<String> {
        let body = [
            ("email", email.to_string()),
            ("name", name.to_string()),
            ("metadata[user_id]", user_id.to_string()),
        ];

        let resp = self
            .http
            .post(format!("{}/customers", STRIPE_API_BASE))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create customer").await?;

        #[derive(Deserialize)]
        struct CustomerResp {
            id: String,
        }

        let parsed: CustomerResp = resp.json().await?;
        Ok(parsed.id)
    }

    /// Creates a one-off Checkout Session priced inline from minor units.
    /// https://stripe.com/docs/payments/checkout
    pub async fn create_checkout_session(
        &self,
        customer_id: &str,
        currency: &str,
        unit_amount: i64,
        metadata: HashMap<String, String>,
    ) -> Result<CreatedCheckoutSession> {
        let mut body: Vec<(String, String)> = vec![
            ("mode".to_string(), "payment".to_string()),
            ("customer".to_string(), customer_id.to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                "Premium Subscription".to_string(),
            ),
            (
                "line_items[0][price_data][product_data][description]".to_string(),
                "Premium account access".to_string(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                unit_amount.to_string(),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
        ];

        for (key, value) in metadata {
            body.push((format!("metadata[{}]", key), value));
        }

        let resp = self
            .http
            .post(format!("{}/checkout/sessions", STRIPE_API_BASE))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create checkout session").await?;

        let parsed: StripeCheckoutSession = resp.json().await?;
        match (parsed.id, parsed.url) {
            (Some(id), Some(url)) => Ok(CreatedCheckoutSession { id, url }),
            _ => anyhow::bail!("Stripe Checkout session id or URL is missing"),
        }
    }

    /// Retrieves a Checkout Session; `Ok(None)` when Stripe does not know
    /// the id. https://stripe.com/docs/api/checkout/sessions/retrieve
    pub async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<Option<StripeCheckoutSession>> {
        let resp = self
            .http
            .get(format!("{}/checkout/sessions/{}", STRIPE_API_BASE, session_id))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::ensure_success(resp, "retrieve checkout session").await?;

        let session: StripeCheckoutSession = resp.json().await?;
        Ok(Some(session))
    }

    /// Verifies the webhook signature. https://stripe.com/docs/webhooks/signatures
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent> {
        let mut timestamp: Option<&str> = None;
        let mut signature: Option<&str> = None;

        for part in signature_header.split(',') {
            if let Some(rest) = part.strip_prefix("t=") {
                timestamp = Some(rest);
            } else if let Some(rest) = part.strip_prefix("v1=") {
                signature = Some(rest);
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| anyhow::anyhow!("missing timestamp in stripe-signature"))?;
        let signature =
            signature.ok_or_else(|| anyhow::anyhow!("missing v1 in stripe-signature"))?;

        let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())?;
        mac.update(signed_payload.as_bytes());
        let expected = mac.finalize().into_bytes();
        let provided = hex::decode(signature)?;

        if expected[..] != provided[..] {
            anyhow::bail!("invalid webhook signature");
        }

        let event: StripeEvent = serde_json::from_slice(payload)?;
        Ok(event)
    }

    pub fn extract_checkout_session(event: &StripeEvent) -> Option<StripeCheckoutSession> {
        serde_json::from_value(event.data.object.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(webhook_secret: &str) -> StripeClient {
        StripeClient::new(
            "sk_test_dummy".to_string(),
            webhook_secret.to_string(),
            "http://localhost:3000/payment-success".to_string(),
            "http://localhost:3000/payment-cancel".to_string(),
        )
    }

    fn sign(secret: &str, timestamp: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, String::from_utf8_lossy(payload)).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn completed_event_payload(user_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_123",
            "type": "checkout.session.completed",
            "created": 1700000000,
            "data": {
                "object": {
                    "id": "cs_test_123",
                    "payment_status": "paid",
                    "metadata": { "user_id": user_id }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn accepts_valid_signature_and_parses_event() {
        let secret = "whsec_unit_test";
        let client = client(secret);
        let payload = completed_event_payload("3fa5d25a-6a1c-4bfb-a9a6-5c5f7f3a2a01");
        let header = format!("t=1700000000,v1={}", sign(secret, "1700000000", &payload));

        let event = client
            .verify_webhook_signature(&payload, &header)
            .expect("valid signature should verify");
        assert_eq!(event.type_, "checkout.session.completed");

        let session = StripeClient::extract_checkout_session(&event).unwrap();
        assert!(session.is_paid());
        assert_eq!(
            session.user_id().unwrap().to_string(),
            "3fa5d25a-6a1c-4bfb-a9a6-5c5f7f3a2a01"
        );
    }

    #[test]
    fn rejects_tampered_payload() {
        let secret = "whsec_unit_test";
        let client = client(secret);
        let payload = completed_event_payload("3fa5d25a-6a1c-4bfb-a9a6-5c5f7f3a2a01");
        let header = format!("t=1700000000,v1={}", sign(secret, "1700000000", &payload));

        let mut tampered = payload.clone();
        let pos = tampered.len() - 5;
        tampered[pos] ^= 0x01;

        assert!(client.verify_webhook_signature(&tampered, &header).is_err());
    }

    #[test]
    fn rejects_signature_from_wrong_secret() {
        let client = client("whsec_real");
        let payload = completed_event_payload("3fa5d25a-6a1c-4bfb-a9a6-5c5f7f3a2a01");
        let header = format!("t=1700000000,v1={}", sign("whsec_forged", "1700000000", &payload));

        assert!(client.verify_webhook_signature(&payload, &header).is_err());
    }

    #[test]
    fn rejects_header_without_v1_part() {
        let client = client("whsec_unit_test");
        let payload = completed_event_payload("3fa5d25a-6a1c-4bfb-a9a6-5c5f7f3a2a01");

        assert!(client.verify_webhook_signature(&payload, "t=1700000000").is_err());
    }

    #[test]
    fn session_without_user_metadata_has_no_user_id() {
        let session: StripeCheckoutSession = serde_json::from_value(json!({
            "id": "cs_test_123",
            "payment_status": "paid",
            "metadata": {}
        }))
        .unwrap();

        assert!(session.is_paid());
        assert!(session.user_id().is_none());
    }
}
