//! Payment processor client.
//!
//! Talks to a Stripe-style REST API: form-encoded requests, bearer auth,
//! amounts in minor units, and webhook signatures in the
//! `t=<unix>,v1=<hmac-sha256-hex>` header scheme.

use crate::config::PaymentsConfig;
use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;

/// How far a webhook timestamp may drift from the local clock.
const WEBHOOK_TOLERANCE_SECONDS: i64 = 300;

const MAX_RETRIES: u32 = 3;

/// Client for the payment processor API.
#[derive(Clone)]
pub struct PaymentClient {
    client: Client,
    config: PaymentsConfig,
}

/// Processor-side customer record.
#[derive(Debug, Deserialize)]
pub struct ProcessorCustomer {
    pub id: String,
    pub email: Option<String>,
}

/// Hosted checkout session for an invoice.
#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Hosted payment page URL, absent once the session is consumed.
    pub url: Option<String>,
    pub payment_status: String,
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

/// Processor API error response.
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: Option<String>,
}

/// Webhook event envelope.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// Pull the invoice id out of the event object's metadata, if present.
    pub fn invoice_id(&self) -> Option<i64> {
        self.data
            .object
            .get("metadata")?
            .get("invoice_id")?
            .as_str()?
            .parse()
            .ok()
    }

    pub fn checkout_session_id(&self) -> Option<&str> {
        self.data.object.get("id")?.as_str()
    }

    pub fn payment_intent_id(&self) -> Option<&str> {
        self.data.object.get("payment_intent")?.as_str()
    }
}

impl PaymentClient {
    pub fn new(config: PaymentsConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    /// Check if the processor is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    /// Create a processor-side customer so payments group under one record.
    pub async fn create_customer(&self, name: &str, email: &str) -> Result<ProcessorCustomer> {
        let params = vec![
            ("name".to_string(), name.to_string()),
            ("email".to_string(), email.to_string()),
        ];
        let body = self.post_form("/customers", &params).await?;
        let customer: ProcessorCustomer = serde_json::from_str(&body)?;
        tracing::info!(processor_customer_id = %customer.id, "Processor customer created");
        Ok(customer)
    }

    /// Create a hosted checkout session for an invoice. The invoice id rides
    /// in the session metadata so the webhook can settle the right row.
    pub async fn create_checkout_session(
        &self,
        invoice_id: i64,
        amount_minor: u64,
        description: &str,
        processor_customer_id: Option<&str>,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession> {
        let mut params = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), success_url.to_string()),
            ("cancel_url".to_string(), cancel_url.to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                self.config.currency.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                amount_minor.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                description.to_string(),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "metadata[invoice_id]".to_string(),
                invoice_id.to_string(),
            ),
            (
                "payment_intent_data[metadata][invoice_id]".to_string(),
                invoice_id.to_string(),
            ),
        ];
        if let Some(customer) = processor_customer_id {
            params.push(("customer".to_string(), customer.to_string()));
        }

        let body = self.post_form("/checkout/sessions", &params).await?;
        let session: CheckoutSession = serde_json::from_str(&body)?;
        tracing::info!(
            session_id = %session.id,
            invoice_id = %invoice_id,
            amount_minor = amount_minor,
            "Checkout session created"
        );
        Ok(session)
    }

    /// Fetch a checkout session by id. Used by the read-path reconciliation
    /// sweep to learn about settlements whose webhook never arrived.
    pub async fn get_checkout_session(&self, session_id: &str) -> Result<CheckoutSession> {
        if !self.is_configured() {
            return Err(anyhow!("Payment processor credentials not configured"));
        }

        let url = format!("{}/checkout/sessions/{}", self.config.api_base_url, session_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            let session: CheckoutSession = serde_json::from_str(&body)?;
            Ok(session)
        } else {
            Err(anyhow!("Failed to fetch checkout session: {}", body))
        }
    }

    /// Verify a webhook signature header of the form `t=<unix>,v1=<hex>`.
    ///
    /// The signed payload is `{t}.{body}`. Rejects timestamps outside the
    /// tolerance window to blunt replay of captured deliveries.
    pub fn verify_webhook_signature(
        &self,
        body: &str,
        signature_header: &str,
        now_unix: i64,
    ) -> Result<bool> {
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();

        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = match timestamp {
            Some(t) => t,
            None => {
                tracing::warn!("Webhook signature header missing timestamp");
                return Ok(false);
            }
        };

        if (now_unix - timestamp).abs() > WEBHOOK_TOLERANCE_SECONDS {
            tracing::warn!(timestamp = timestamp, "Webhook timestamp outside tolerance");
            return Ok(false);
        }

        let signed_payload = format!("{}.{}", timestamp, body);
        let expected = self.compute_signature(
            &signed_payload,
            self.config.webhook_secret.expose_secret(),
        )?;

        let is_valid = candidates.iter().any(|c| *c == expected);
        if !is_valid {
            tracing::warn!("Webhook signature verification failed");
        }

        Ok(is_valid)
    }

    /// Parse a webhook event from the request body.
    pub fn parse_webhook_event(&self, body: &str) -> Result<WebhookEvent> {
        let event: WebhookEvent = serde_json::from_str(body)?;
        Ok(event)
    }

    /// POST a form-encoded request with bounded retry on 429 and 5xx.
    async fn post_form(&self, path: &str, params: &[(String, String)]) -> Result<String> {
        if !self.is_configured() {
            return Err(anyhow!("Payment processor credentials not configured"));
        }

        let url = format!("{}{}", self.config.api_base_url, path);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let response = self
                .client
                .post(&url)
                .bearer_auth(self.config.secret_key.expose_secret())
                .form(params)
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;

            tracing::debug!(status = %status, path = path, "Processor response");

            if status.is_success() {
                return Ok(body);
            }

            let retryable =
                status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if retryable && attempt < MAX_RETRIES {
                let backoff = Duration::from_millis(200 * 2u64.pow(attempt));
                tracing::warn!(
                    status = %status,
                    attempt = attempt,
                    "Retryable processor error, backing off"
                );
                tokio::time::sleep(backoff).await;
                continue;
            }

            let error: ApiError = serde_json::from_str(&body).unwrap_or_else(|_| ApiError {
                error: ApiErrorDetail {
                    error_type: "unknown".to_string(),
                    message: Some(body.clone()),
                },
            });
            tracing::error!(
                error_type = %error.error.error_type,
                message = error.error.message.as_deref().unwrap_or(""),
                "Processor request failed"
            );
            return Err(anyhow!(
                "Processor error: {} - {}",
                error.error.error_type,
                error.error.message.unwrap_or_default()
            ));
        }
    }

    fn compute_signature(&self, payload: &str, secret: &str) -> Result<String> {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| anyhow!("Invalid key length"))?;
        mac.update(payload.as_bytes());
        let result = mac.finalize();
        Ok(hex::encode(result.into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn test_config() -> PaymentsConfig {
        PaymentsConfig {
            secret_key: Secret::new("sk_test_123".to_string()),
            webhook_secret: Secret::new("whsec_test".to_string()),
            api_base_url: "https://api.example.com/v1".to_string(),
            currency: "usd".to_string(),
        }
    }

    fn sign(client: &PaymentClient, body: &str, timestamp: i64) -> String {
        let payload = format!("{}.{}", timestamp, body);
        let sig = client.compute_signature(&payload, "whsec_test").unwrap();
        format!("t={},v1={}", timestamp, sig)
    }

    #[test]
    fn is_configured_requires_secret_key() {
        let client = PaymentClient::new(test_config());
        assert!(client.is_configured());

        let empty = PaymentsConfig {
            secret_key: Secret::new("".to_string()),
            webhook_secret: Secret::new("".to_string()),
            api_base_url: "".to_string(),
            currency: "usd".to_string(),
        };
        assert!(!PaymentClient::new(empty).is_configured());
    }

    #[test]
    fn webhook_signature_round_trip() {
        let client = PaymentClient::new(test_config());
        let body = r#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{}}}"#;
        let now = 1_700_000_000;
        let header = sign(&client, body, now);

        assert!(client.verify_webhook_signature(body, &header, now).unwrap());
    }

    #[test]
    fn webhook_signature_rejects_tampered_body() {
        let client = PaymentClient::new(test_config());
        let now = 1_700_000_000;
        let header = sign(&client, "original", now);

        assert!(!client
            .verify_webhook_signature("tampered", &header, now)
            .unwrap());
    }

    #[test]
    fn webhook_signature_rejects_stale_timestamp() {
        let client = PaymentClient::new(test_config());
        let body = "{}";
        let old = 1_700_000_000;
        let header = sign(&client, body, old);

        // Same signature, delivered 10 minutes later.
        assert!(!client
            .verify_webhook_signature(body, &header, old + 600)
            .unwrap());
    }

    #[test]
    fn webhook_signature_rejects_missing_parts() {
        let client = PaymentClient::new(test_config());
        assert!(!client
            .verify_webhook_signature("{}", "v1=deadbeef", 1_700_000_000)
            .unwrap());
        assert!(!client
            .verify_webhook_signature("{}", "garbage", 1_700_000_000)
            .unwrap());
    }

    #[test]
    fn webhook_event_extracts_invoice_metadata() {
        let client = PaymentClient::new(test_config());
        let body = r#"{
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_test_42",
                    "payment_intent": "pi_99",
                    "metadata": {"invoice_id": "17"}
                }
            }
        }"#;

        let event = client.parse_webhook_event(body).unwrap();
        assert_eq!(event.event_type, "checkout.session.completed");
        assert_eq!(event.invoice_id(), Some(17));
        assert_eq!(event.checkout_session_id(), Some("cs_test_42"));
        assert_eq!(event.payment_intent_id(), Some("pi_99"));
    }

    #[test]
    fn webhook_event_without_metadata_yields_none() {
        let client = PaymentClient::new(test_config());
        let body = r#"{"id":"evt_2","type":"ping","data":{"object":{"id":"obj_1"}}}"#;
        let event = client.parse_webhook_event(body).unwrap();
        assert_eq!(event.invoice_id(), None);
        assert_eq!(event.payment_intent_id(), None);
    }
}
