//! Project administration: creation from accepted quotes and status
//! transitions.

use crate::models::ProjectStatus;
use crate::services::notifications;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use service_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub quote_id: i64,
    #[serde(default)]
    pub deposit_required: bool,
    pub scheduled_date: Option<NaiveDate>,
    pub scheduled_time: Option<String>,
}

/// Create a project from an accepted quote.
pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, AppError> {
    let project = state
        .lifecycle
        .create_project_from_quote(
            request.quote_id,
            request.deposit_required,
            request.scheduled_date,
            request.scheduled_time,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(project)))
}

/// Project detail with its invoices.
pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let project = state
        .db
        .get_project(project_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Project not found")))?;

    let invoices = state.db.list_invoices_for_project(project_id).await?;
    let balance_due = project.balance_due();

    Ok(Json(json!({
        "project": project,
        "balance_due": balance_due,
        "invoices": invoices,
    })))
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: String,
    pub reason: Option<String>,
}

/// Drive a project through its status machine.
pub async fn transition_project(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    Json(request): Json<TransitionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let to = ProjectStatus::parse(&request.status).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("Unknown project status: {}", request.status))
    })?;

    if let Some(reason) = request.reason.as_deref() {
        tracing::info!(project_id = %project_id, to = to.as_str(), reason = reason, "Status change requested");
    }

    let today = Utc::now().date_naive();
    let (outcome, pending) = state.lifecycle.transition_project(project_id, to, today).await?;

    let emails = notifications::dispatch(
        state.email.as_ref(),
        &state.config.app.owner_email,
        pending,
    )
    .await;

    Ok(Json(json!({
        "project": outcome.project,
        "balance_invoice": outcome.balance_invoice,
        "invoices_cancelled": outcome.invoices_cancelled,
        "emails": emails,
    })))
}
