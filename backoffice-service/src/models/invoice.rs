//! Invoice model for backoffice-service.

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Days before the scheduled date a deposit falls due.
pub const DEPOSIT_LEAD_DAYS: u64 = 3;
/// Grace window for a deposit when the schedule is far out or unset.
pub const DEPOSIT_GRACE_DAYS: u64 = 3;
/// Grace window for a balance invoice with no scheduled date.
pub const BALANCE_GRACE_DAYS: u64 = 7;

/// Invoice type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    Deposit,
    Balance,
    Full,
    Additional,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Deposit => "deposit",
            InvoiceType::Balance => "balance",
            InvoiceType::Full => "full",
            InvoiceType::Additional => "additional",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "deposit" => InvoiceType::Deposit,
            "balance" => InvoiceType::Balance,
            "additional" => InvoiceType::Additional,
            _ => InvoiceType::Full,
        }
    }
}

/// Invoice status. `pending`, `sent` and `overdue` are all "open": an open
/// invoice blocks creation of another invoice of the same type for the
/// project, and gets swept up by a project cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Sent,
    Overdue,
    Paid,
    Cancelled,
}

/// Open statuses used in `status IN (...)` clauses.
pub const OPEN_INVOICE_STATUSES: [&str; 3] = ["pending", "sent", "overdue"];

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => InvoiceStatus::Sent,
            "overdue" => InvoiceStatus::Overdue,
            "paid" => InvoiceStatus::Paid,
            "cancelled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Pending,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Pending | InvoiceStatus::Sent | InvoiceStatus::Overdue
        )
    }
}

/// Invoice record: a single payable charge tied to exactly one project.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: i64,
    pub project_id: i64,
    pub customer_id: i64,
    pub amount: Decimal,
    pub invoice_type: String,
    pub status: String,
    pub payment_intent_id: Option<String>,
    pub checkout_session_id: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub paid_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    pub fn invoice_type(&self) -> InvoiceType {
        InvoiceType::from_string(&self.invoice_type)
    }
}

/// Input for creating an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub project_id: i64,
    pub customer_id: i64,
    pub amount: Decimal,
    pub invoice_type: InvoiceType,
    pub due_date: Option<NaiveDate>,
}

/// Due date for a deposit invoice: the earlier of (schedule - lead days) and
/// (today + grace days), clamped so it is never in the past.
pub fn deposit_due_date(today: NaiveDate, scheduled: Option<NaiveDate>) -> NaiveDate {
    let grace = today
        .checked_add_days(Days::new(DEPOSIT_GRACE_DAYS))
        .unwrap_or(today);
    let due = match scheduled.and_then(|d| d.checked_sub_days(Days::new(DEPOSIT_LEAD_DAYS))) {
        Some(lead) => lead.min(grace),
        None => grace,
    };
    due.max(today)
}

/// Due date for a balance invoice: the scheduled date, or today + grace days
/// when nothing is scheduled.
pub fn balance_due_date(today: NaiveDate, scheduled: Option<NaiveDate>) -> NaiveDate {
    scheduled.unwrap_or_else(|| {
        today
            .checked_add_days(Days::new(BALANCE_GRACE_DAYS))
            .unwrap_or(today)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn deposit_due_uses_lead_time_when_schedule_is_near() {
        // Schedule 5 days out: lead (schedule - 3) beats grace (today + 3).
        let due = deposit_due_date(date("2026-03-01"), Some(date("2026-03-06")));
        assert_eq!(due, date("2026-03-03"));
    }

    #[test]
    fn deposit_due_uses_grace_when_schedule_is_far() {
        let due = deposit_due_date(date("2026-03-01"), Some(date("2026-04-20")));
        assert_eq!(due, date("2026-03-04"));
    }

    #[test]
    fn deposit_due_is_clamped_to_today() {
        // Schedule tomorrow: schedule - 3 would be in the past.
        let due = deposit_due_date(date("2026-03-01"), Some(date("2026-03-02")));
        assert_eq!(due, date("2026-03-01"));
    }

    #[test]
    fn deposit_due_without_schedule_is_grace_window() {
        let due = deposit_due_date(date("2026-03-01"), None);
        assert_eq!(due, date("2026-03-04"));
    }

    #[test]
    fn balance_due_is_schedule_date() {
        let due = balance_due_date(date("2026-03-01"), Some(date("2026-03-15")));
        assert_eq!(due, date("2026-03-15"));
    }

    #[test]
    fn balance_due_without_schedule_uses_grace() {
        let due = balance_due_date(date("2026-03-01"), None);
        assert_eq!(due, date("2026-03-08"));
    }

    #[test]
    fn open_statuses_match_helper() {
        for s in OPEN_INVOICE_STATUSES {
            assert!(InvoiceStatus::from_string(s).is_open());
        }
        assert!(!InvoiceStatus::Paid.is_open());
        assert!(!InvoiceStatus::Cancelled.is_open());
    }
}
