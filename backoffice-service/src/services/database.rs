//! Database service for backoffice-service.
//!
//! All writes are single parameterized statements; multi-step flows rely on
//! conditional `UPDATE ... WHERE status IN (...)` clauses as optimistic
//! locks. Zero affected rows after a non-error execution means a lost race,
//! which callers report distinctly from a hard database error.

use crate::models::{
    CreateCustomer, CreateInvoice, CreateProject, CreateQuote, Customer, Invoice, Project,
    ProjectStatus, Quote, QuoteStatus,
};
use crate::services::metrics::DB_QUERY_DURATION;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

const QUOTE_COLUMNS: &str = "quote_id, customer_id, contact_name, contact_email, contact_phone, \
     contact_address, service_type, property_size, description, photo_urls, amount, quote_notes, \
     valid_until, status, quoted_utc, accepted_utc, created_utc";

const PROJECT_COLUMNS: &str = "project_id, customer_id, quote_id, service_type, description, \
     total_amount, deposit_amount, deposit_paid, balance_paid, scheduled_date, scheduled_time, \
     status, completed_utc, cancelled_utc, created_utc";

const INVOICE_COLUMNS: &str = "invoice_id, project_id, customer_id, amount, invoice_type, \
     status, payment_intent_id, checkout_session_id, due_date, paid_utc, created_utc";

const CUSTOMER_COLUMNS: &str =
    "customer_id, name, email, phone, address, processor_customer_id, created_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "backoffice-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Customer Operations
    // -------------------------------------------------------------------------

    /// Create a new customer. The email is stored normalized.
    #[instrument(skip(self, input))]
    pub async fn create_customer(&self, input: &CreateCustomer) -> Result<Customer, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_customer"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(&format!(
            r#"
            INSERT INTO customers (name, email, phone, address)
            VALUES ($1, LOWER(TRIM($2)), $3, $4)
            RETURNING {CUSTOMER_COLUMNS}
            "#,
        ))
        .bind(&input.name)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.address)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Customer with this email already exists"))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create customer: {}", e)),
        })?;

        timer.observe_duration();

        info!(customer_id = %customer.customer_id, "Customer created");

        Ok(customer)
    }

    /// Get a customer by ID.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn get_customer(&self, customer_id: i64) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_customer"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE customer_id = $1"
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get customer: {}", e)))?;

        timer.observe_duration();

        Ok(customer)
    }

    /// Look up a customer by normalized email.
    #[instrument(skip(self, email))]
    pub async fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_customer_by_email"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE email = LOWER(TRIM($1))"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find customer by email: {}", e))
        })?;

        timer.observe_duration();

        Ok(customer)
    }

    /// Stamp the payment-processor customer reference, first write wins.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn set_processor_customer_id(
        &self,
        customer_id: i64,
        processor_customer_id: &str,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_processor_customer_id"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE customers
            SET processor_customer_id = COALESCE(processor_customer_id, $2)
            WHERE customer_id = $1
            "#,
        )
        .bind(customer_id)
        .bind(processor_customer_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to set processor customer id: {}",
                e
            ))
        })?;

        timer.observe_duration();

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Quote Operations
    // -------------------------------------------------------------------------

    /// Create a pending quote from the public intake form.
    #[instrument(skip(self, input))]
    pub async fn create_quote(&self, input: &CreateQuote) -> Result<Quote, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_quote"])
            .start_timer();

        let property_size = input.property_size.map(|s| s.as_str().to_string());

        let quote = sqlx::query_as::<_, Quote>(&format!(
            r#"
            INSERT INTO quotes (
                customer_id, contact_name, contact_email, contact_phone, contact_address,
                service_type, property_size, description, photo_urls, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending')
            RETURNING {QUOTE_COLUMNS}
            "#,
        ))
        .bind(input.customer_id)
        .bind(&input.contact_name)
        .bind(&input.contact_email)
        .bind(&input.contact_phone)
        .bind(&input.contact_address)
        .bind(input.service_type.as_str())
        .bind(property_size)
        .bind(&input.description)
        .bind(&input.photo_urls)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create quote: {}", e)))?;

        timer.observe_duration();

        info!(quote_id = %quote.quote_id, service_type = %quote.service_type, "Quote created");

        Ok(quote)
    }

    /// Get a quote by ID.
    #[instrument(skip(self), fields(quote_id = %quote_id))]
    pub async fn get_quote(&self, quote_id: i64) -> Result<Option<Quote>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_quote"])
            .start_timer();

        let quote = sqlx::query_as::<_, Quote>(&format!(
            "SELECT {QUOTE_COLUMNS} FROM quotes WHERE quote_id = $1"
        ))
        .bind(quote_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get quote: {}", e)))?;

        timer.observe_duration();

        Ok(quote)
    }

    /// List quotes, newest first, optionally filtered by status.
    #[instrument(skip(self))]
    pub async fn list_quotes(
        &self,
        status: Option<QuoteStatus>,
        limit: i64,
    ) -> Result<Vec<Quote>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_quotes"])
            .start_timer();

        let status_str = status.map(|s| s.as_str().to_string());

        let quotes = sqlx::query_as::<_, Quote>(&format!(
            r#"
            SELECT {QUOTE_COLUMNS}
            FROM quotes
            WHERE ($1::varchar IS NULL OR status = $1)
            ORDER BY created_utc DESC
            LIMIT $2
            "#,
        ))
        .bind(&status_str)
        .bind(limit.clamp(1, 200))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list quotes: {}", e)))?;

        timer.observe_duration();

        Ok(quotes)
    }

    /// Price a quote and (re)mark it `quoted`.
    ///
    /// The update is conditioned on the current status so a racing update of
    /// a terminal-state row cannot be silently overwritten. `Ok(None)` after
    /// a non-error execution means the race was lost ("already updated"),
    /// which the caller reports as a conflict, not a database error.
    ///
    /// `quoted_utc` keeps its first value; notes are only overwritten when
    /// new ones were supplied; the validity deadline resets on every send.
    #[instrument(skip(self, packed_notes), fields(quote_id = %quote_id))]
    pub async fn price_quote(
        &self,
        quote_id: i64,
        amount: Decimal,
        packed_notes: Option<String>,
        validity_days: i64,
    ) -> Result<Option<Quote>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["price_quote"])
            .start_timer();

        let quote = sqlx::query_as::<_, Quote>(&format!(
            r#"
            UPDATE quotes
            SET amount = $2,
                status = 'quoted',
                quoted_utc = COALESCE(quoted_utc, NOW()),
                quote_notes = COALESCE($3, quote_notes),
                valid_until = NOW() + make_interval(days => $4)
            WHERE quote_id = $1 AND status IN ('pending', 'quoted')
            RETURNING {QUOTE_COLUMNS}
            "#,
        ))
        .bind(quote_id)
        .bind(amount)
        .bind(&packed_notes)
        .bind(validity_days as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to price quote: {}", e)))?;

        timer.observe_duration();

        if let Some(ref q) = quote {
            info!(quote_id = %q.quote_id, amount = %amount, "Quote priced");
        }

        Ok(quote)
    }

    /// Mark a quote accepted and backfill the customer link if missing.
    ///
    /// Conditioned on `quoted`/`accepted` so the call is safe to re-run when
    /// a previous acceptance partially failed; `accepted_utc` keeps its
    /// first value.
    #[instrument(skip(self), fields(quote_id = %quote_id, customer_id = %customer_id))]
    pub async fn accept_quote(
        &self,
        quote_id: i64,
        customer_id: i64,
    ) -> Result<Option<Quote>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["accept_quote"])
            .start_timer();

        let quote = sqlx::query_as::<_, Quote>(&format!(
            r#"
            UPDATE quotes
            SET status = 'accepted',
                accepted_utc = COALESCE(accepted_utc, NOW()),
                customer_id = COALESCE(customer_id, $2)
            WHERE quote_id = $1 AND status IN ('quoted', 'accepted')
            RETURNING {QUOTE_COLUMNS}
            "#,
        ))
        .bind(quote_id)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to accept quote: {}", e)))?;

        timer.observe_duration();

        if let Some(ref q) = quote {
            info!(quote_id = %q.quote_id, "Quote accepted");
        }

        Ok(quote)
    }

    // -------------------------------------------------------------------------
    // Project Operations
    // -------------------------------------------------------------------------

    /// Create a project from an accepted quote.
    ///
    /// The unique index on `quote_id` backs the one-project-per-quote
    /// invariant; a second creation attempt surfaces as a conflict.
    #[instrument(skip(self, input), fields(quote_id = %input.quote_id))]
    pub async fn create_project(&self, input: &CreateProject) -> Result<Project, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_project"])
            .start_timer();

        let project = sqlx::query_as::<_, Project>(&format!(
            r#"
            INSERT INTO projects (
                customer_id, quote_id, service_type, description, total_amount,
                deposit_amount, scheduled_date, scheduled_time, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'scheduled')
            RETURNING {PROJECT_COLUMNS}
            "#,
        ))
        .bind(input.customer_id)
        .bind(input.quote_id)
        .bind(&input.service_type)
        .bind(&input.description)
        .bind(input.total_amount)
        .bind(input.deposit_amount)
        .bind(input.scheduled_date)
        .bind(&input.scheduled_time)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "A project already exists for quote {}",
                    input.quote_id
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create project: {}", e)),
        })?;

        timer.observe_duration();

        info!(project_id = %project.project_id, quote_id = %input.quote_id, "Project created");

        Ok(project)
    }

    /// Get a project by ID.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn get_project(&self, project_id: i64) -> Result<Option<Project>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_project"])
            .start_timer();

        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE project_id = $1"
        ))
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get project: {}", e)))?;

        timer.observe_duration();

        Ok(project)
    }

    /// Find the project created from a quote, if any.
    #[instrument(skip(self), fields(quote_id = %quote_id))]
    pub async fn find_project_by_quote(&self, quote_id: i64) -> Result<Option<Project>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_project_by_quote"])
            .start_timer();

        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE quote_id = $1"
        ))
        .bind(quote_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find project by quote: {}", e))
        })?;

        timer.observe_duration();

        Ok(project)
    }

    /// List a customer's projects, newest first.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn list_projects_for_customer(
        &self,
        customer_id: i64,
    ) -> Result<Vec<Project>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_projects_for_customer"])
            .start_timer();

        let projects = sqlx::query_as::<_, Project>(&format!(
            r#"
            SELECT {PROJECT_COLUMNS}
            FROM projects
            WHERE customer_id = $1
            ORDER BY created_utc DESC
            "#,
        ))
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list projects: {}", e)))?;

        timer.observe_duration();

        Ok(projects)
    }

    /// Apply a validated status transition, conditioned on the expected
    /// current status. `Ok(None)` means a concurrent update won the race.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn update_project_status(
        &self,
        project_id: i64,
        from: ProjectStatus,
        to: ProjectStatus,
    ) -> Result<Option<Project>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_project_status"])
            .start_timer();

        let project = sqlx::query_as::<_, Project>(&format!(
            r#"
            UPDATE projects
            SET status = $3,
                completed_utc = CASE WHEN $3 = 'completed' THEN NOW() ELSE completed_utc END,
                cancelled_utc = CASE WHEN $3 = 'cancelled' THEN NOW() ELSE cancelled_utc END
            WHERE project_id = $1 AND status = $2
            RETURNING {PROJECT_COLUMNS}
            "#,
        ))
        .bind(project_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update project status: {}", e))
        })?;

        timer.observe_duration();

        if let Some(ref p) = project {
            info!(project_id = %p.project_id, from = from.as_str(), to = to.as_str(), "Project status updated");
        }

        Ok(project)
    }

    /// Flip paid flags on a project. Flags only ever go from false to true.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn set_project_paid_flags(
        &self,
        project_id: i64,
        deposit_paid: bool,
        balance_paid: bool,
    ) -> Result<Option<Project>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_project_paid_flags"])
            .start_timer();

        let project = sqlx::query_as::<_, Project>(&format!(
            r#"
            UPDATE projects
            SET deposit_paid = deposit_paid OR $2,
                balance_paid = balance_paid OR $3
            WHERE project_id = $1
            RETURNING {PROJECT_COLUMNS}
            "#,
        ))
        .bind(project_id)
        .bind(deposit_paid)
        .bind(balance_paid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to set paid flags: {}", e))
        })?;

        timer.observe_duration();

        Ok(project)
    }

    /// Count a customer's completed projects, excluding one project id.
    /// Used to detect the first-ever completion for the feedback email.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn count_other_completed_projects(
        &self,
        customer_id: i64,
        excluding_project_id: i64,
    ) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["count_other_completed_projects"])
            .start_timer();

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM projects
            WHERE customer_id = $1
              AND project_id <> $2
              AND status = 'completed'
            "#,
        )
        .bind(customer_id)
        .bind(excluding_project_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to count completed projects: {}", e))
        })?;

        timer.observe_duration();

        Ok(count)
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    /// Create a pending invoice.
    #[instrument(skip(self, input), fields(project_id = %input.project_id))]
    pub async fn create_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (project_id, customer_id, amount, invoice_type, status, due_date)
            VALUES ($1, $2, $3, $4, 'pending', $5)
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(input.project_id)
        .bind(input.customer_id)
        .bind(input.amount)
        .bind(input.invoice_type.as_str())
        .bind(input.due_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)))?;

        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_type = %invoice.invoice_type,
            amount = %invoice.amount,
            "Invoice created"
        );

        Ok(invoice)
    }

    /// Get an invoice by ID.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: i64) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Find the open (`pending`/`sent`/`overdue`) invoice of a given type for
    /// a project. Callers reuse this row instead of creating a duplicate.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn find_open_invoice(
        &self,
        project_id: i64,
        invoice_type: &str,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_open_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE project_id = $1
              AND invoice_type = $2
              AND status IN ('pending', 'sent', 'overdue')
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        ))
        .bind(project_id)
        .bind(invoice_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find open invoice: {}", e))
        })?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// List invoices for a project, oldest first.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn list_invoices_for_project(
        &self,
        project_id: i64,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices_for_project"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE project_id = $1
            ORDER BY created_utc
            "#,
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// Mark an invoice paid, stamping the payment-intent id when known.
    /// Conditioned on the open statuses so a duplicate webhook or a
    /// reconciliation sweep racing the webhook cannot double-settle.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn mark_invoice_paid(
        &self,
        invoice_id: i64,
        payment_intent_id: Option<&str>,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_invoice_paid"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = 'paid',
                paid_utc = NOW(),
                payment_intent_id = COALESCE($2, payment_intent_id)
            WHERE invoice_id = $1 AND status IN ('pending', 'sent', 'overdue')
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(invoice_id)
        .bind(payment_intent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark invoice paid: {}", e))
        })?;

        timer.observe_duration();

        if let Some(ref inv) = invoice {
            info!(invoice_id = %inv.invoice_id, "Invoice marked paid");
        }

        Ok(invoice)
    }

    /// Stamp the checkout-session reference on an open invoice.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn set_checkout_session(
        &self,
        invoice_id: i64,
        checkout_session_id: &str,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_checkout_session"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET checkout_session_id = $2
            WHERE invoice_id = $1 AND status IN ('pending', 'sent', 'overdue')
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(invoice_id)
        .bind(checkout_session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to set checkout session: {}", e))
        })?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Cancel every open invoice for a project. Returns how many rows
    /// changed; used when the project itself is cancelled.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn cancel_open_invoices(&self, project_id: i64) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cancel_open_invoices"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'cancelled'
            WHERE project_id = $1 AND status IN ('pending', 'sent', 'overdue')
            "#,
        )
        .bind(project_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to cancel open invoices: {}", e))
        })?;

        timer.observe_duration();

        let cancelled = result.rows_affected();
        if cancelled > 0 {
            info!(project_id = %project_id, count = cancelled, "Open invoices cancelled");
        }

        Ok(cancelled)
    }
}
