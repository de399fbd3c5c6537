//! Public quote acceptance, gated by the emailed token.

use crate::services::notifications;
use crate::AppState;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;
use service_core::error::AppError;

/// Show the customer what they are accepting.
pub async fn preview(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let preview = state.lifecycle.preview_quote(&token).await?;
    Ok(Json(preview))
}

/// Accept the quote. Safe to call twice; the second call returns the
/// project the first one created.
pub async fn accept(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let today = Utc::now().date_naive();
    let (outcome, pending) = state.lifecycle.accept_quote(&token, today).await?;

    let emails = notifications::dispatch(
        state.email.as_ref(),
        &state.config.app.owner_email,
        pending,
    )
    .await;

    Ok(Json(json!({
        "quote_id": outcome.quote.quote_id,
        "status": outcome.quote.status,
        "project": outcome.project,
        "deposit_invoice": outcome.deposit_invoice,
        "emails": emails,
    })))
}
