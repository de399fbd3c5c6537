//! Customer self-service portal.
//!
//! Reads here opportunistically reconcile invoice state against the payment
//! processor before responding, so a customer who just paid on the hosted
//! page sees the settlement even if the webhook is still in flight.

use crate::middleware::auth::CurrentUser;
use crate::AppState;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use service_core::error::AppError;

fn customer_id(user: &CurrentUser) -> Result<i64, AppError> {
    user.0.customer_id.ok_or_else(|| {
        AppError::Forbidden(anyhow::anyhow!("Session is not linked to a customer"))
    })
}

/// The customer's projects, freshest payment state first.
pub async fn list_projects(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let customer_id = customer_id(&user)?;

    let projects = state.db.list_projects_for_customer(customer_id).await?;
    for project in &projects {
        state
            .lifecycle
            .reconcile_project_invoices(project.project_id)
            .await;
    }

    // Re-read so the response reflects anything the sweep settled.
    let projects = state.db.list_projects_for_customer(customer_id).await?;
    Ok(Json(json!({ "projects": projects })))
}

/// One project with its invoices.
pub async fn get_project(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let customer_id = customer_id(&user)?;

    let project = state
        .db
        .get_project(project_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Project not found")))?;

    if project.customer_id != customer_id {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Project belongs to another customer"
        )));
    }

    state.lifecycle.reconcile_project_invoices(project_id).await;

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

/// Start a hosted checkout for one of the customer's open invoices.
pub async fn create_checkout(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(invoice_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let customer_id = customer_id(&user)?;

    let invoice = state
        .db
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    if invoice.customer_id != customer_id {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Invoice belongs to another customer"
        )));
    }

    let (invoice, url) = state.lifecycle.create_checkout(invoice_id).await?;

    Ok(Json(json!({
        "invoice": invoice,
        "checkout_url": url,
    })))
}
