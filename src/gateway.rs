use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::config::CheckoutConfig;

type HmacSha256 = Hmac<Sha256>;

/// Signed webhook timestamps older than this are rejected as replays.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request to checkout provider failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("checkout provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed signature header")]
    MalformedSignature,

    #[error("signature timestamp outside tolerance")]
    StaleTimestamp,

    #[error("signature mismatch")]
    SignatureMismatch,
}

/// Parameters for a hosted checkout session. Amount is in minor units; the
/// metadata fields let the webhook correlate the session back to an order.
#[derive(Debug)]
pub struct SessionRequest<'a> {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: &'a str,
    pub amount_minor: i64,
    pub currency: &'a str,
    pub client_name: &'a str,
    pub client_email: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

/// Inbound webhook event, as delivered by the provider.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: WebhookObject,
}

#[derive(Debug, Deserialize)]
pub struct WebhookObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "object", default)]
    pub object_kind: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl WebhookEvent {
    /// Session id carried by the event: the object id for checkout-session
    /// events, otherwise whatever the metadata recorded at session creation.
    pub fn session_id(&self) -> Option<&str> {
        let object = &self.data.object;
        if object.object_kind.as_deref() == Some("checkout.session") {
            object.id.as_deref()
        } else {
            object.metadata.get("session_id").map(String::as_str)
        }
    }

    pub fn metadata_order_id(&self) -> Option<Uuid> {
        self.data
            .object
            .metadata
            .get("order_id")
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

/// Client for the hosted-checkout provider. All credentials come from the
/// injected [`CheckoutConfig`].
#[derive(Clone)]
pub struct CheckoutGateway {
    http: reqwest::Client,
    config: CheckoutConfig,
}

impl CheckoutGateway {
    pub fn new(config: CheckoutConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self { http, config })
    }

    pub async fn create_session(
        &self,
        request: &SessionRequest<'_>,
    ) -> Result<CheckoutSession, GatewayError> {
        let url = format!("{}/v1/checkout/sessions", self.config.api_base);
        let success_url = format!(
            "{}?session_id={{CHECKOUT_SESSION_ID}}",
            self.config.success_url
        );
        let params: Vec<(&str, String)> = vec![
            ("mode", "payment".to_string()),
            ("payment_method_types[0]", "card".to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            (
                "line_items[0][price_data][currency]",
                request.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                request.amount_minor.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                request.product_name.to_string(),
            ),
            ("success_url", success_url),
            ("cancel_url", self.config.cancel_url.clone()),
            ("metadata[order_id]", request.order_id.to_string()),
            ("metadata[product_id]", request.product_id.to_string()),
            ("metadata[client_name]", request.client_name.to_string()),
            ("metadata[client_email]", request.client_email.to_string()),
        ];

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .form(&params)
            .send()
            .await?;
        Self::parse_session(response).await
    }

    pub async fn retrieve_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, GatewayError> {
        let url = format!("{}/v1/checkout/sessions/{session_id}", self.config.api_base);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;
        Self::parse_session(response).await
    }

    async fn parse_session(response: reqwest::Response) -> Result<CheckoutSession, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<CheckoutSession>().await?);
        }
        let message = response
            .json::<ApiErrorBody>()
            .await
            .ok()
            .and_then(|body| body.error)
            .and_then(|detail| detail.message)
            .unwrap_or_else(|| "unknown provider error".to_string());
        Err(GatewayError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Verify a `t=<unix>,v1=<hex hmac>` signature header against the raw
    /// request body. Unverified payloads must never be processed.
    pub fn verify_signature(&self, payload: &[u8], header: &str) -> Result<(), GatewayError> {
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();
        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or(GatewayError::MalformedSignature)?;
            match key {
                "t" => {
                    timestamp = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| GatewayError::MalformedSignature)?,
                    );
                }
                "v1" => candidates.push(value),
                // Other schemes (v0 test signatures) are ignored.
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(GatewayError::MalformedSignature)?;
        if candidates.is_empty() {
            return Err(GatewayError::MalformedSignature);
        }
        if (Utc::now().timestamp() - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(GatewayError::StaleTimestamp);
        }

        for candidate in candidates {
            let Ok(expected) = hex::decode(candidate) else {
                continue;
            };
            let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes())
                .expect("HMAC can take key of any size");
            mac.update(format!("{timestamp}.").as_bytes());
            mac.update(payload);
            if mac.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }
        Err(GatewayError::SignatureMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_gateway() -> CheckoutGateway {
        CheckoutGateway::new(CheckoutConfig {
            secret_key: "sk_test_xxx".to_string(),
            webhook_secret: "whsec_test123secret456".to_string(),
            api_base: "https://api.stripe.com".to_string(),
            success_url: "http://localhost:8000/api/orders/success".to_string(),
            cancel_url: "http://localhost:8000/api/orders/cancel".to_string(),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_valid_signature() {
        let gateway = test_gateway();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let timestamp = Utc::now().timestamp();
        let signature = sign(payload, "whsec_test123secret456", timestamp);
        let header = format!("t={timestamp},v1={signature}");

        assert!(gateway.verify_signature(payload, &header).is_ok());
    }

    #[test]
    fn rejects_wrong_secret() {
        let gateway = test_gateway();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let timestamp = Utc::now().timestamp();
        let signature = sign(payload, "wrong_secret", timestamp);
        let header = format!("t={timestamp},v1={signature}");

        assert!(matches!(
            gateway.verify_signature(payload, &header),
            Err(GatewayError::SignatureMismatch)
        ));
    }

    #[test]
    fn rejects_modified_payload() {
        let gateway = test_gateway();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let tampered = br#"{"type":"checkout.session.completed","extra":true}"#;
        let timestamp = Utc::now().timestamp();
        let signature = sign(payload, "whsec_test123secret456", timestamp);
        let header = format!("t={timestamp},v1={signature}");

        assert!(matches!(
            gateway.verify_signature(tampered, &header),
            Err(GatewayError::SignatureMismatch)
        ));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let gateway = test_gateway();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let timestamp = Utc::now().timestamp() - 600;
        let signature = sign(payload, "whsec_test123secret456", timestamp);
        let header = format!("t={timestamp},v1={signature}");

        assert!(matches!(
            gateway.verify_signature(payload, &header),
            Err(GatewayError::StaleTimestamp)
        ));
    }

    #[test]
    fn rejects_malformed_headers() {
        let gateway = test_gateway();
        let payload = br#"{}"#;

        for header in ["garbage", "v1=deadbeef", "t=1234567890", "t=notanumber,v1=aa"] {
            assert!(matches!(
                gateway.verify_signature(payload, header),
                Err(GatewayError::MalformedSignature)
            ));
        }
    }

    #[test]
    fn session_events_correlate_by_object_id() {
        let event: WebhookEvent = serde_json::from_value(serde_json::json!({
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_test_abc",
                    "object": "checkout.session",
                    "payment_status": "paid",
                    "status": "complete",
                    "metadata": { "order_id": "3fa85f64-5717-4562-b3fc-2c963f66afa6" }
                }
            }
        }))
        .unwrap();

        assert_eq!(event.session_id(), Some("cs_test_abc"));
        assert_eq!(
            event.metadata_order_id(),
            Some(Uuid::parse_str("3fa85f64-5717-4562-b3fc-2c963f66afa6").unwrap())
        );
    }

    #[test]
    fn intent_events_correlate_via_metadata() {
        let event: WebhookEvent = serde_json::from_value(serde_json::json!({
            "type": "payment_intent.succeeded",
            "data": {
                "object": {
                    "id": "pi_test_123",
                    "object": "payment_intent",
                    "status": "succeeded",
                    "metadata": { "session_id": "cs_test_abc", "order_id": "not-a-uuid" }
                }
            }
        }))
        .unwrap();

        assert_eq!(event.session_id(), Some("cs_test_abc"));
        assert_eq!(event.metadata_order_id(), None);
    }
}
