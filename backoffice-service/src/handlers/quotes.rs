//! Quote intake (public) and quote administration.

use crate::models::{CreateQuote, PropertySize, Quote, QuoteNotes, QuoteStatus, ServiceType};
use crate::services::metrics::QUOTES_TOTAL;
use crate::services::notifications;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_core::error::AppError;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitQuoteRequest {
    #[validate(length(min = 1, max = 200, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    #[validate(length(max = 30))]
    pub phone: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    pub service_type: String,
    pub property_size: Option<String>,
    #[validate(length(min = 1, max = 5000, message = "Description is required"))]
    pub description: String,
    #[serde(default)]
    pub photo_urls: Vec<String>,
}

/// Public quote intake.
pub async fn submit_quote(
    State(state): State<AppState>,
    Json(request): Json<SubmitQuoteRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let service_type = ServiceType::parse(&request.service_type).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!(
            "Unknown service type: {}",
            request.service_type
        ))
    })?;

    let property_size = match request.property_size.as_deref() {
        Some(raw) => Some(PropertySize::parse(raw).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Unknown property size: {}", raw))
        })?),
        None => None,
    };

    // Returning customers are linked up front so their portal shows the
    // quote without waiting for acceptance.
    let customer_id = match request.email.as_deref() {
        Some(email) => state
            .db
            .find_customer_by_email(email)
            .await?
            .map(|c| c.customer_id),
        None => None,
    };

    let quote = state
        .db
        .create_quote(&CreateQuote {
            customer_id,
            contact_name: request.name,
            contact_email: request.email.map(|e| e.trim().to_lowercase()),
            contact_phone: request.phone,
            contact_address: request.address,
            service_type,
            property_size,
            description: request.description,
            photo_urls: request.photo_urls,
        })
        .await?;

    QUOTES_TOTAL.with_label_values(&["pending"]).inc();

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "quote_id": quote.quote_id,
            "status": quote.status,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListQuotesQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct QuoteDetail {
    #[serde(flatten)]
    pub quote: Quote,
    pub parsed_notes: QuoteNotes,
}

/// Admin quote list, newest first.
pub async fn list_quotes(
    State(state): State<AppState>,
    Query(query): Query<ListQuotesQuery>,
) -> Result<impl IntoResponse, AppError> {
    let status = match query.status.as_deref() {
        Some(raw) => {
            let parsed = QuoteStatus::from_string(raw);
            if parsed.as_str() != raw {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Unknown quote status: {}",
                    raw
                )));
            }
            Some(parsed)
        }
        None => None,
    };

    let quotes = state.db.list_quotes(status, query.limit.unwrap_or(50)).await?;
    Ok(Json(json!({ "quotes": quotes })))
}

/// Admin quote detail with the notes blob unpacked.
pub async fn get_quote(
    State(state): State<AppState>,
    Path(quote_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let quote = state
        .db
        .get_quote(quote_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Quote not found")))?;

    let parsed_notes = quote.notes();
    Ok(Json(QuoteDetail { quote, parsed_notes }))
}

#[derive(Debug, Deserialize)]
pub struct PriceQuoteRequest {
    pub amount: Decimal,
    pub notes: Option<String>,
    pub timeline: Option<String>,
    pub terms: Option<String>,
}

/// Admin "send quote": price the quote and email the acceptance link.
pub async fn send_quote(
    State(state): State<AppState>,
    Path(quote_id): Path<i64>,
    Json(request): Json<PriceQuoteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let notes = QuoteNotes {
        notes: request.notes,
        timeline: request.timeline,
        terms: request.terms,
    };

    let (quote, pending) = state
        .lifecycle
        .price_quote(quote_id, request.amount, notes)
        .await?;

    let emails = notifications::dispatch(
        state.email.as_ref(),
        &state.config.app.owner_email,
        pending,
    )
    .await;

    Ok(Json(json!({
        "quote": quote,
        "emails": emails,
    })))
}
