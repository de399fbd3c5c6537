//! Quote, project and invoice lifecycle engine.
//!
//! Every mutating operation here is a multi-step flow over single-statement
//! writes. There are no cross-statement transactions; flows are written to
//! tolerate re-entry after a partial failure (existence checks before
//! inserts, conditional status-guarded updates) instead of rolling back.
//! State changes return the notifications they owe rather than sending
//! email inline.

use crate::models::{
    balance_due_date, deposit_due_date, round2, to_minor_units, CreateCustomer, CreateInvoice,
    CreateProject, Customer, DepositPolicy, Invoice, InvoiceType, Project, ProjectStatus, Quote,
    QuoteNotes, QuoteStatus, ServiceType, TransitionError,
};
use crate::services::database::Database;
use crate::services::metrics::{
    INVOICES_TOTAL, PROJECTS_TOTAL, QUOTES_TOTAL, RECONCILIATIONS_TOTAL,
};
use crate::services::notifications::{self, Notification};
use crate::services::payments::PaymentClient;
use crate::services::tokens::AcceptanceTokens;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Inclusive bounds on a quoted price, in dollars.
pub const MIN_QUOTE_AMOUNT: i64 = 50;
pub const MAX_QUOTE_AMOUNT: i64 = 10_000;

/// Deposit fraction applied to every accepted quote.
fn deposit_for(amount: Decimal) -> Decimal {
    round2(amount * Decimal::new(5, 1))
}

/// Normalize a quoted price to cents and check it against the accepted
/// range. Runs before any row is touched, so a rejection leaves the quote
/// exactly as it was.
pub fn validate_quote_amount(amount: Decimal) -> Result<Decimal, AppError> {
    let amount = round2(amount);
    if amount < Decimal::from(MIN_QUOTE_AMOUNT) || amount > Decimal::from(MAX_QUOTE_AMOUNT) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Price must be between ${} and ${}",
            MIN_QUOTE_AMOUNT,
            MAX_QUOTE_AMOUNT
        )));
    }
    Ok(amount)
}

/// Deposit still owed on a project, if any. A project that carries no
/// deposit amount (the admin path for no-deposit service types) never
/// grows one, even when acceptance re-runs against it.
pub fn outstanding_deposit(project: &Project) -> Option<Decimal> {
    if project.deposit_paid {
        return None;
    }
    project.deposit_amount
}

/// Which project paid-flags a settled invoice flips.
pub fn paid_flags_for(invoice_type: InvoiceType) -> (bool, bool) {
    match invoice_type {
        InvoiceType::Deposit => (true, false),
        InvoiceType::Balance => (false, true),
        InvoiceType::Full => (true, true),
        InvoiceType::Additional => (false, false),
    }
}

/// What the customer sees on the acceptance page.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AcceptancePreview {
    pub quote_id: i64,
    pub service_type: String,
    pub service_label: String,
    pub amount: Decimal,
    pub deposit_amount: Decimal,
    pub notes: QuoteNotes,
    pub valid_until: Option<chrono::DateTime<Utc>>,
}

/// Result of a successful (or idempotently repeated) acceptance.
#[derive(Debug, Clone)]
pub struct AcceptanceOutcome {
    pub quote: Quote,
    pub project: Project,
    pub deposit_invoice: Option<Invoice>,
}

/// Result of an admin status transition.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub project: Project,
    pub balance_invoice: Option<Invoice>,
    pub invoices_cancelled: u64,
}

/// What the webhook handler did with a delivery.
#[derive(Debug, Clone)]
pub enum WebhookDisposition {
    Settled(Invoice),
    AlreadySettled,
    Ignored,
}

/// Settings the engine needs from configuration.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub base_url: String,
    pub owner_email: String,
    pub quote_validity_days: i64,
    pub acceptance_token_ttl_days: i64,
}

/// The lifecycle engine. Stateless apart from its collaborators.
#[derive(Clone)]
pub struct Lifecycle {
    db: Arc<Database>,
    tokens: Arc<dyn AcceptanceTokens>,
    payments: PaymentClient,
    settings: LifecycleSettings,
}

impl Lifecycle {
    pub fn new(
        db: Arc<Database>,
        tokens: Arc<dyn AcceptanceTokens>,
        payments: PaymentClient,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            db,
            tokens,
            payments,
            settings,
        }
    }

    fn accept_url(&self, token: &str) -> String {
        format!("{}/accept/{}", self.settings.base_url, token)
    }

    fn pay_url(&self, invoice_id: i64) -> String {
        format!("{}/portal/pay/{}", self.settings.base_url, invoice_id)
    }

    // -------------------------------------------------------------------------
    // Quote pricing (admin "send quote")
    // -------------------------------------------------------------------------

    /// Price a quote and mark it `quoted`.
    ///
    /// The acceptance token is persisted before the row is touched; if the
    /// token store fails, the quote is left unmodified. Resending an
    /// already-`quoted` quote is allowed and issues a fresh token, which
    /// invalidates the link in any earlier email.
    #[instrument(skip(self, notes), fields(quote_id = %quote_id))]
    pub async fn price_quote(
        &self,
        quote_id: i64,
        amount: Decimal,
        notes: QuoteNotes,
    ) -> Result<(Quote, Vec<Notification>), AppError> {
        let amount = validate_quote_amount(amount)?;

        let quote = self
            .db
            .get_quote(quote_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Quote not found")))?;

        match quote.status() {
            QuoteStatus::Pending | QuoteStatus::Quoted => {}
            other => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Quote is {} and can no longer be priced",
                    other.as_str()
                )));
            }
        }

        // Pricing exists to email a payment-bearing link; a quote nobody can
        // be reached on is a hard failure, not a silent skip.
        let recipient = self.resolve_quote_email(&quote).await?.ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Quote has no customer email on file"))
        })?;

        let ttl_seconds = (self.settings.acceptance_token_ttl_days as u64) * 24 * 60 * 60;
        let token = self.tokens.issue(quote_id, ttl_seconds).await?;

        let updated = self
            .db
            .price_quote(
                quote_id,
                amount,
                notes.pack(),
                self.settings.quote_validity_days,
            )
            .await?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!("Quote was already updated"))
            })?;

        QUOTES_TOTAL.with_label_values(&["quoted"]).inc();

        let service_label = ServiceType::parse(&updated.service_type)
            .map(|s| s.label())
            .unwrap_or("landscaping");
        let accept_url = self.accept_url(&token);
        let notifications =
            notifications::on_quote_sent(&updated, &recipient, service_label, accept_url);

        Ok((updated, notifications))
    }

    async fn resolve_quote_email(&self, quote: &Quote) -> Result<Option<String>, AppError> {
        if let Some(email) = quote.contact_email.as_deref().filter(|e| !e.trim().is_empty()) {
            return Ok(Some(email.trim().to_lowercase()));
        }
        if let Some(customer_id) = quote.customer_id {
            if let Some(customer) = self.db.get_customer(customer_id).await? {
                return Ok(Some(customer.email));
            }
        }
        Ok(None)
    }

    // -------------------------------------------------------------------------
    // Quote acceptance (public, token-gated)
    // -------------------------------------------------------------------------

    /// Resolve an acceptance link for display.
    ///
    /// Every failure collapses to the same client-safe error; the page must
    /// not leak which precondition failed.
    #[instrument(skip(self, token))]
    pub async fn preview_quote(&self, token: &str) -> Result<AcceptancePreview, AppError> {
        let not_available =
            || AppError::NotFound(anyhow::anyhow!("This quote is not available"));

        let quote_id = self.tokens.resolve(token).await?.ok_or_else(not_available)?;
        let quote = self
            .db
            .get_quote(quote_id)
            .await?
            .ok_or_else(not_available)?;

        if quote.status() != QuoteStatus::Quoted || quote.is_expired(Utc::now()) {
            return Err(not_available());
        }

        let amount = quote.amount.ok_or_else(not_available)?;
        let service = ServiceType::parse(&quote.service_type);

        Ok(AcceptancePreview {
            quote_id: quote.quote_id,
            service_type: quote.service_type.clone(),
            service_label: service.map(|s| s.label()).unwrap_or("Other").to_string(),
            amount,
            deposit_amount: deposit_for(amount),
            notes: quote.notes(),
            valid_until: quote.valid_until,
        })
    }

    /// Accept a quote: mark it accepted, create the project and deposit
    /// invoice, consume the token.
    ///
    /// Idempotent under retry and duplicate clicks. A re-run after a partial
    /// failure picks up where the last attempt stopped: an existing project
    /// or open deposit invoice is returned, never duplicated. The token is
    /// deleted only after every write succeeded, so a retry can still get in.
    #[instrument(skip(self, token))]
    pub async fn accept_quote(
        &self,
        token: &str,
        today: NaiveDate,
    ) -> Result<(AcceptanceOutcome, Vec<Notification>), AppError> {
        let quote_id = self.tokens.resolve(token).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Invalid or expired token"))
        })?;

        let quote = self
            .db
            .get_quote(quote_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Quote not found")))?;

        match quote.status() {
            QuoteStatus::Quoted | QuoteStatus::Accepted => {}
            other => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Quote is {} and can no longer be accepted",
                    other.as_str()
                )));
            }
        }

        let amount = quote.amount.ok_or_else(|| {
            AppError::Conflict(anyhow::anyhow!("Quote has no price set"))
        })?;

        let customer = self.resolve_customer(&quote).await?;

        let accepted = self
            .db
            .accept_quote(quote_id, customer.customer_id)
            .await?
            .ok_or_else(|| AppError::Conflict(anyhow::anyhow!("Quote was already updated")))?;

        QUOTES_TOTAL.with_label_values(&["accepted"]).inc();

        // Re-entry point: a previous attempt may have created the project
        // already, with or without its invoice.
        let project = match self.db.find_project_by_quote(quote_id).await? {
            Some(existing) => existing,
            None => {
                let created = self
                    .db
                    .create_project(&CreateProject {
                        customer_id: customer.customer_id,
                        quote_id,
                        service_type: accepted.service_type.clone(),
                        description: accepted.description.clone(),
                        total_amount: amount,
                        // Every accepted quote takes a 50% deposit here. The
                        // service-type deposit policy applies only to the
                        // admin creation path.
                        deposit_amount: Some(deposit_for(amount)),
                        scheduled_date: None,
                        scheduled_time: None,
                    })
                    .await?;
                PROJECTS_TOTAL.with_label_values(&["scheduled"]).inc();
                created
            }
        };

        // The project row decides whether a deposit is owed. Re-entry over an
        // admin-created no-deposit project must not invent one.
        let deposit_invoice = match outstanding_deposit(&project) {
            None => None,
            Some(deposit) => match self
                .db
                .find_open_invoice(project.project_id, InvoiceType::Deposit.as_str())
                .await?
            {
                Some(existing) => Some(existing),
                None => {
                    let created = self
                        .db
                        .create_invoice(&CreateInvoice {
                            project_id: project.project_id,
                            customer_id: customer.customer_id,
                            amount: deposit,
                            invoice_type: InvoiceType::Deposit,
                            due_date: Some(deposit_due_date(today, project.scheduled_date)),
                        })
                        .await?;
                    INVOICES_TOTAL
                        .with_label_values(&["deposit", "pending"])
                        .inc();
                    Some(created)
                }
            },
        };

        self.ensure_processor_customer(&customer).await;

        let service_label = ServiceType::parse(&accepted.service_type)
            .map(|s| s.label())
            .unwrap_or("landscaping");

        let mut notifications = Vec::new();
        if let Some(ref invoice) = deposit_invoice {
            notifications.push(Notification::PaymentRequested {
                to: customer.email.clone(),
                customer_name: customer.name.clone(),
                invoice_type: InvoiceType::Deposit,
                amount: invoice.amount,
                due_date: invoice.due_date,
                pay_url: self.pay_url(invoice.invoice_id),
            });
        }
        notifications.push(Notification::OwnerAcceptedNotice {
            quote_id,
            project_id: project.project_id,
            customer_name: customer.name.clone(),
            service_label: service_label.to_string(),
            amount,
        });

        // Only now is the link dead. A failure anywhere above leaves the
        // token alive so the customer can retry.
        self.tokens.consume(token, quote_id).await?;

        info!(quote_id = %quote_id, project_id = %project.project_id, "Quote accepted");

        Ok((
            AcceptanceOutcome {
                quote: accepted,
                project,
                deposit_invoice,
            },
            notifications,
        ))
    }

    /// Resolve the customer a quote belongs to: linked id first, then
    /// normalized email lookup, then a fresh record from the contact
    /// snapshot. A quote with neither a link nor an email cannot proceed.
    async fn resolve_customer(&self, quote: &Quote) -> Result<Customer, AppError> {
        if let Some(customer_id) = quote.customer_id {
            if let Some(customer) = self.db.get_customer(customer_id).await? {
                return Ok(customer);
            }
        }

        let email = quote
            .contact_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!(
                    "Quote has no customer email and no linked customer"
                ))
            })?;

        if let Some(existing) = self.db.find_customer_by_email(email).await? {
            return Ok(existing);
        }

        self.db
            .create_customer(&CreateCustomer {
                name: quote.contact_name.clone(),
                email: email.to_lowercase(),
                phone: quote.contact_phone.clone(),
                address: quote.contact_address.clone(),
            })
            .await
    }

    /// Best-effort: make sure the customer exists at the payment processor
    /// so their payments group under one record. Never fails the caller.
    async fn ensure_processor_customer(&self, customer: &Customer) {
        if !self.payments.is_configured() || customer.processor_customer_id.is_some() {
            return;
        }
        match self
            .payments
            .create_customer(&customer.name, &customer.email)
            .await
        {
            Ok(remote) => {
                if let Err(e) = self
                    .db
                    .set_processor_customer_id(customer.customer_id, &remote.id)
                    .await
                {
                    warn!(customer_id = %customer.customer_id, error = %e, "Failed to stamp processor customer id");
                }
            }
            Err(e) => {
                warn!(customer_id = %customer.customer_id, error = %e, "Processor customer creation failed");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Project creation (admin)
    // -------------------------------------------------------------------------

    /// Create a project from an accepted quote with an explicit schedule and
    /// deposit decision.
    ///
    /// The deposit rule is a closed set over service types: deposit-required
    /// services must take one, no-deposit services must not, and anything
    /// else rejects an explicit deposit request.
    #[instrument(skip(self), fields(quote_id = %quote_id))]
    pub async fn create_project_from_quote(
        &self,
        quote_id: i64,
        deposit_required: bool,
        scheduled_date: Option<NaiveDate>,
        scheduled_time: Option<String>,
    ) -> Result<Project, AppError> {
        let quote = self
            .db
            .get_quote(quote_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Quote not found")))?;

        if quote.status() != QuoteStatus::Accepted {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Quote is {}, only accepted quotes become projects",
                quote.status().as_str()
            )));
        }

        let amount = quote
            .amount
            .ok_or_else(|| AppError::Conflict(anyhow::anyhow!("Quote has no price set")))?;

        let customer_id = quote.customer_id.ok_or_else(|| {
            AppError::Conflict(anyhow::anyhow!("Quote has no linked customer"))
        })?;

        let service = ServiceType::parse(&quote.service_type);
        let deposit_amount = match service.map(|s| s.deposit_policy()) {
            Some(DepositPolicy::Required) => {
                if !deposit_required {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "{} projects require a deposit",
                        service.map(|s| s.label()).unwrap_or("These")
                    )));
                }
                Some(deposit_for(amount))
            }
            Some(DepositPolicy::NotAllowed) | None => {
                if deposit_required {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "{} projects do not take a deposit",
                        service.map(|s| s.label()).unwrap_or("These")
                    )));
                }
                None
            }
        };

        let project = self
            .db
            .create_project(&CreateProject {
                customer_id,
                quote_id,
                service_type: quote.service_type.clone(),
                description: quote.description.clone(),
                total_amount: amount,
                deposit_amount,
                scheduled_date,
                scheduled_time,
            })
            .await?;

        PROJECTS_TOTAL.with_label_values(&["scheduled"]).inc();

        Ok(project)
    }

    // -------------------------------------------------------------------------
    // Project status transitions (admin)
    // -------------------------------------------------------------------------

    /// Drive a project through its status machine, with the completion and
    /// cancellation side effects.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn transition_project(
        &self,
        project_id: i64,
        to: ProjectStatus,
        today: NaiveDate,
    ) -> Result<(TransitionOutcome, Vec<Notification>), AppError> {
        let project = self
            .db
            .get_project(project_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Project not found")))?;

        let from = project.status();
        ProjectStatus::validate_transition(from, to).map_err(|e| match e {
            TransitionError::Redundant(_) => AppError::Conflict(anyhow::anyhow!("{}", e)),
            TransitionError::Invalid { .. } => AppError::BadRequest(anyhow::anyhow!("{}", e)),
        })?;

        let updated = self
            .db
            .update_project_status(project_id, from, to)
            .await?
            .ok_or_else(|| AppError::Conflict(anyhow::anyhow!("Project was already updated")))?;

        PROJECTS_TOTAL.with_label_values(&[to.as_str()]).inc();

        let customer = self.db.get_customer(updated.customer_id).await?;
        let service_label = ServiceType::parse(&updated.service_type)
            .map(|s| s.label())
            .unwrap_or("landscaping");

        let mut balance_invoice = None;
        let mut invoices_cancelled = 0;
        let mut notifications = Vec::new();

        match to {
            ProjectStatus::Completed => {
                // A balance invoice only makes sense once a deposit was
                // actually paid and something remains.
                if updated.deposit_paid && updated.balance_due() > Decimal::ZERO {
                    let invoice = match self
                        .db
                        .find_open_invoice(project_id, InvoiceType::Balance.as_str())
                        .await?
                    {
                        Some(existing) => existing,
                        None => {
                            let created = self
                                .db
                                .create_invoice(&CreateInvoice {
                                    project_id,
                                    customer_id: updated.customer_id,
                                    amount: updated.balance_due(),
                                    invoice_type: InvoiceType::Balance,
                                    due_date: Some(balance_due_date(
                                        today,
                                        updated.scheduled_date,
                                    )),
                                })
                                .await?;
                            INVOICES_TOTAL
                                .with_label_values(&["balance", "pending"])
                                .inc();
                            created
                        }
                    };
                    balance_invoice = Some(invoice);
                }

                if let Some(customer) = customer {
                    let first_completion = self
                        .db
                        .count_other_completed_projects(customer.customer_id, project_id)
                        .await?
                        == 0;
                    let balance_ref = balance_invoice
                        .as_ref()
                        .map(|inv| (inv, self.pay_url(inv.invoice_id)));
                    notifications = notifications::on_project_completed(
                        &customer.name,
                        &customer.email,
                        service_label,
                        balance_ref,
                        first_completion,
                    );
                } else {
                    warn!(project_id = %project_id, "Completed project has no customer record, skipping emails");
                }
            }
            ProjectStatus::Cancelled => {
                invoices_cancelled = self.db.cancel_open_invoices(project_id).await?;
                if let Some(customer) = customer {
                    notifications.push(Notification::ProjectCancelled {
                        to: customer.email,
                        customer_name: customer.name,
                        service_label: service_label.to_string(),
                    });
                }
            }
            _ => {}
        }

        Ok((
            TransitionOutcome {
                project: updated,
                balance_invoice,
                invoices_cancelled,
            },
            notifications,
        ))
    }

    // -------------------------------------------------------------------------
    // Checkout and settlement
    // -------------------------------------------------------------------------

    /// Create a hosted checkout session for an open invoice and stamp the
    /// session id so the webhook and the reconciliation sweep can find it.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn create_checkout(&self, invoice_id: i64) -> Result<(Invoice, String), AppError> {
        let invoice = self
            .db
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        if !invoice.status().is_open() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice is {} and cannot be paid",
                invoice.status().as_str()
            )));
        }

        let amount_minor = to_minor_units(invoice.amount).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Invoice amount is not payable"))
        })?;

        let customer = self.db.get_customer(invoice.customer_id).await?;
        let processor_customer_id = customer
            .as_ref()
            .and_then(|c| c.processor_customer_id.as_deref());

        let description = format!(
            "{} invoice #{}",
            invoice.invoice_type().as_str(),
            invoice.invoice_id
        );
        let success_url = format!("{}/portal/payment-complete", self.settings.base_url);
        let cancel_url = self.pay_url(invoice.invoice_id);

        let session = self
            .payments
            .create_checkout_session(
                invoice.invoice_id,
                amount_minor,
                &description,
                processor_customer_id,
                &success_url,
                &cancel_url,
            )
            .await
            .map_err(|e| AppError::UpstreamError(format!("Checkout creation failed: {}", e)))?;

        let url = session.url.clone().ok_or_else(|| {
            AppError::UpstreamError("Checkout session has no payment URL".to_string())
        })?;

        let stamped = self
            .db
            .set_checkout_session(invoice.invoice_id, &session.id)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!("Invoice was settled while creating checkout"))
            })?;

        Ok((stamped, url))
    }

    /// Handle a webhook delivery: verify, parse, settle.
    #[instrument(skip(self, body, signature_header))]
    pub async fn settle_webhook(
        &self,
        body: &str,
        signature_header: &str,
        now_unix: i64,
    ) -> Result<(WebhookDisposition, Vec<Notification>), AppError> {
        let valid = self
            .payments
            .verify_webhook_signature(body, signature_header, now_unix)
            .map_err(|e| AppError::UpstreamError(format!("Signature check failed: {}", e)))?;
        if !valid {
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Invalid webhook signature"
            )));
        }

        let event = self
            .payments
            .parse_webhook_event(body)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Malformed webhook body: {}", e)))?;

        if event.event_type != "checkout.session.completed" {
            info!(event_type = %event.event_type, "Ignoring webhook event type");
            return Ok((WebhookDisposition::Ignored, Vec::new()));
        }

        let invoice_id = match event.invoice_id() {
            Some(id) => id,
            None => {
                warn!(event_id = %event.id, "Webhook session has no invoice metadata");
                return Ok((WebhookDisposition::Ignored, Vec::new()));
            }
        };

        let invoice = match self.db.get_invoice(invoice_id).await? {
            Some(invoice) => invoice,
            None => {
                warn!(invoice_id = %invoice_id, "Webhook references unknown invoice");
                return Ok((WebhookDisposition::Ignored, Vec::new()));
            }
        };

        self.settle_invoice(invoice, event.payment_intent_id()).await
    }

    /// Mark an invoice paid and flip the matching project flags. The
    /// status-guarded update makes duplicate deliveries a no-op.
    async fn settle_invoice(
        &self,
        invoice: Invoice,
        payment_intent_id: Option<&str>,
    ) -> Result<(WebhookDisposition, Vec<Notification>), AppError> {
        let settled = match self
            .db
            .mark_invoice_paid(invoice.invoice_id, payment_intent_id)
            .await?
        {
            Some(settled) => settled,
            None => return Ok((WebhookDisposition::AlreadySettled, Vec::new())),
        };

        let invoice_type = settled.invoice_type();
        INVOICES_TOTAL
            .with_label_values(&[invoice_type.as_str(), "paid"])
            .inc();

        let (deposit_paid, balance_paid) = paid_flags_for(invoice_type);
        if deposit_paid || balance_paid {
            self.db
                .set_project_paid_flags(settled.project_id, deposit_paid, balance_paid)
                .await?;
        }

        let mut notifications = Vec::new();
        if let Some(customer) = self.db.get_customer(settled.customer_id).await? {
            notifications.push(Notification::PaymentReceipt {
                to: customer.email,
                customer_name: customer.name,
                invoice_type,
                amount: settled.amount,
            });
        }

        info!(invoice_id = %settled.invoice_id, "Invoice settled");

        Ok((WebhookDisposition::Settled(settled), notifications))
    }

    // -------------------------------------------------------------------------
    // Read-path reconciliation ("self-heal")
    // -------------------------------------------------------------------------

    /// Opportunistically settle invoices whose checkout completed but whose
    /// webhook has not landed yet. Runs on portal reads. Every failure is
    /// swallowed; this must never block the read it piggybacks on. The
    /// webhook remains the authoritative settlement path.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn reconcile_project_invoices(&self, project_id: i64) -> u64 {
        if !self.payments.is_configured() {
            return 0;
        }

        let invoices = match self.db.list_invoices_for_project(project_id).await {
            Ok(invoices) => invoices,
            Err(e) => {
                warn!(project_id = %project_id, error = %e, "Reconciliation listing failed");
                RECONCILIATIONS_TOTAL.with_label_values(&["failed"]).inc();
                return 0;
            }
        };

        let mut healed = 0;
        for invoice in invoices {
            if !invoice.status().is_open() {
                continue;
            }
            let session_id = match invoice.checkout_session_id.as_deref() {
                Some(id) => id,
                None => continue,
            };

            let session = match self.payments.get_checkout_session(session_id).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(invoice_id = %invoice.invoice_id, error = %e, "Session lookup failed during reconciliation");
                    RECONCILIATIONS_TOTAL.with_label_values(&["failed"]).inc();
                    continue;
                }
            };

            if !session.is_paid() {
                RECONCILIATIONS_TOTAL.with_label_values(&["clean"]).inc();
                continue;
            }

            match self
                .settle_invoice(invoice, session.payment_intent.as_deref())
                .await
            {
                Ok((WebhookDisposition::Settled(settled), _)) => {
                    info!(invoice_id = %settled.invoice_id, "Reconciliation settled invoice ahead of webhook");
                    RECONCILIATIONS_TOTAL.with_label_values(&["healed"]).inc();
                    healed += 1;
                }
                Ok(_) => {
                    RECONCILIATIONS_TOTAL.with_label_values(&["clean"]).inc();
                }
                Err(e) => {
                    warn!(error = %e, "Reconciliation settlement failed");
                    RECONCILIATIONS_TOTAL.with_label_values(&["failed"]).inc();
                }
            }
        }

        healed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn project(deposit: Option<&str>, deposit_paid: bool) -> Project {
        Project {
            project_id: 1,
            customer_id: 1,
            quote_id: Some(42),
            service_type: "lawn_care".to_string(),
            description: "Weekly mowing".to_string(),
            total_amount: dec("275.00"),
            deposit_amount: deposit.map(dec),
            deposit_paid,
            balance_paid: false,
            scheduled_date: None,
            scheduled_time: None,
            status: "scheduled".to_string(),
            completed_utc: None,
            cancelled_utc: None,
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn deposit_is_half_rounded_to_cents() {
        assert_eq!(deposit_for(dec("275")), dec("137.50"));
        assert_eq!(deposit_for(dec("99.99")), dec("50.00"));
        assert_eq!(deposit_for(dec("100.01")), dec("50.01"));
    }

    #[test]
    fn quote_price_bounds_are_inclusive() {
        assert!(validate_quote_amount(dec("49.99")).is_err());
        assert_eq!(validate_quote_amount(dec("50")).unwrap(), dec("50.00"));
        assert_eq!(validate_quote_amount(dec("10000")).unwrap(), dec("10000.00"));
        assert!(validate_quote_amount(dec("10000.01")).is_err());
    }

    #[test]
    fn quote_price_is_rounded_before_the_bounds_check() {
        // 49.996 rounds up into range; 10000.004 rounds down into range.
        assert_eq!(validate_quote_amount(dec("49.996")).unwrap(), dec("50.00"));
        assert_eq!(validate_quote_amount(dec("10000.004")).unwrap(), dec("10000.00"));
    }

    #[test]
    fn no_deposit_project_never_grows_a_deposit_invoice() {
        // Admin-created lawn-care project carries no deposit; a retried
        // acceptance over it must not invoice one.
        assert_eq!(outstanding_deposit(&project(None, false)), None);
    }

    #[test]
    fn paid_deposit_is_not_owed_again() {
        assert_eq!(outstanding_deposit(&project(Some("137.50"), true)), None);
    }

    #[test]
    fn unpaid_deposit_uses_the_stored_amount() {
        assert_eq!(
            outstanding_deposit(&project(Some("137.50"), false)),
            Some(dec("137.50"))
        );
    }

    #[test]
    fn paid_flags_cover_every_invoice_type() {
        assert_eq!(paid_flags_for(InvoiceType::Deposit), (true, false));
        assert_eq!(paid_flags_for(InvoiceType::Balance), (false, true));
        assert_eq!(paid_flags_for(InvoiceType::Full), (true, true));
        assert_eq!(paid_flags_for(InvoiceType::Additional), (false, false));
    }
}
