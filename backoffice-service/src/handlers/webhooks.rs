//! Payment processor webhook.
//!
//! The authoritative settlement path. The raw body is needed byte-for-byte
//! for signature verification, so this handler takes it as a string rather
//! than a deserialized type.

use crate::services::lifecycle::WebhookDisposition;
use crate::services::notifications;
use crate::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;
use service_core::error::AppError;

const SIGNATURE_HEADER: &str = "Stripe-Signature";

pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing webhook signature header"))
        })?;

    let (disposition, pending) = state
        .lifecycle
        .settle_webhook(&body, signature, Utc::now().timestamp())
        .await?;

    // Receipt emails are best-effort; the processor only needs the 200.
    notifications::dispatch(state.email.as_ref(), &state.config.app.owner_email, pending).await;

    let status = match disposition {
        WebhookDisposition::Settled(invoice) => {
            json!({ "received": true, "settled_invoice_id": invoice.invoice_id })
        }
        WebhookDisposition::AlreadySettled => json!({ "received": true, "duplicate": true }),
        WebhookDisposition::Ignored => json!({ "received": true }),
    };

    Ok(Json(status))
}
