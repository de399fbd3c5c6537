//! Project model and status machine.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

/// Project status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

/// Rejected project status transition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Project is already {}", .0.label())]
    Redundant(ProjectStatus),
    #[error("Invalid status transition from {} to {}", .from.label(), .to.label())]
    Invalid {
        from: ProjectStatus,
        to: ProjectStatus,
    },
}

impl ProjectStatus {
    /// Canonical wire form. Input parsing tolerates the hyphenated spelling,
    /// but this is the only form ever emitted.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Scheduled => "scheduled",
            ProjectStatus::InProgress => "in_progress",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Cancelled => "cancelled",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProjectStatus::Scheduled => "Scheduled",
            ProjectStatus::InProgress => "In Progress",
            ProjectStatus::Completed => "Completed",
            ProjectStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "scheduled" => Some(ProjectStatus::Scheduled),
            "in_progress" => Some(ProjectStatus::InProgress),
            "completed" => Some(ProjectStatus::Completed),
            "cancelled" => Some(ProjectStatus::Cancelled),
            _ => None,
        }
    }

    pub fn from_string(s: &str) -> Self {
        Self::parse(s).unwrap_or(ProjectStatus::Scheduled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Cancelled)
    }

    /// Validate an admin-driven transition against the allowed-edge table:
    ///
    /// | from        | allowed to              |
    /// |-------------|-------------------------|
    /// | scheduled   | in_progress, cancelled  |
    /// | in_progress | completed, cancelled    |
    /// | completed   | (terminal)              |
    /// | cancelled   | (terminal)              |
    ///
    /// Self-transitions are rejected as redundant, not treated as a no-op.
    pub fn validate_transition(from: ProjectStatus, to: ProjectStatus) -> Result<(), TransitionError> {
        if from == to {
            return Err(TransitionError::Redundant(from));
        }
        let allowed = match (from, to) {
            (ProjectStatus::Scheduled, ProjectStatus::InProgress) => true,
            (ProjectStatus::Scheduled, ProjectStatus::Cancelled) => true,
            (ProjectStatus::InProgress, ProjectStatus::Completed) => true,
            (ProjectStatus::InProgress, ProjectStatus::Cancelled) => true,
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(TransitionError::Invalid { from, to })
        }
    }
}

/// Project record. Exactly one project exists per accepted quote.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub project_id: i64,
    pub customer_id: i64,
    pub quote_id: Option<i64>,
    pub service_type: String,
    pub description: String,
    pub total_amount: Decimal,
    pub deposit_amount: Option<Decimal>,
    pub deposit_paid: bool,
    pub balance_paid: bool,
    pub scheduled_date: Option<NaiveDate>,
    pub scheduled_time: Option<String>,
    pub status: String,
    pub completed_utc: Option<DateTime<Utc>>,
    pub cancelled_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl Project {
    pub fn status(&self) -> ProjectStatus {
        ProjectStatus::from_string(&self.status)
    }

    /// Outstanding balance. Once the balance is paid this is zero no matter
    /// what the stored amounts say.
    pub fn balance_due(&self) -> Decimal {
        if self.balance_paid {
            return Decimal::ZERO;
        }
        if self.deposit_paid {
            let deposit = self.deposit_amount.unwrap_or(Decimal::ZERO);
            (self.total_amount - deposit).max(Decimal::ZERO)
        } else {
            self.total_amount
        }
    }
}

/// Input for creating a project from an accepted quote.
#[derive(Debug, Clone)]
pub struct CreateProject {
    pub customer_id: i64,
    pub quote_id: i64,
    pub service_type: String,
    pub description: String,
    pub total_amount: Decimal,
    pub deposit_amount: Option<Decimal>,
    pub scheduled_date: Option<NaiveDate>,
    pub scheduled_time: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn project(total: &str, deposit: Option<&str>, deposit_paid: bool, balance_paid: bool) -> Project {
        Project {
            project_id: 1,
            customer_id: 1,
            quote_id: Some(1),
            service_type: "flower_beds".to_string(),
            description: "Front bed install".to_string(),
            total_amount: dec(total),
            deposit_amount: deposit.map(dec),
            deposit_paid,
            balance_paid,
            scheduled_date: None,
            scheduled_time: None,
            status: "scheduled".to_string(),
            completed_utc: None,
            cancelled_utc: None,
            created_utc: Utc::now(),
        }
    }

    const ALL: [ProjectStatus; 4] = [
        ProjectStatus::Scheduled,
        ProjectStatus::InProgress,
        ProjectStatus::Completed,
        ProjectStatus::Cancelled,
    ];

    #[test]
    fn transition_table_is_closed() {
        let allowed = [
            (ProjectStatus::Scheduled, ProjectStatus::InProgress),
            (ProjectStatus::Scheduled, ProjectStatus::Cancelled),
            (ProjectStatus::InProgress, ProjectStatus::Completed),
            (ProjectStatus::InProgress, ProjectStatus::Cancelled),
        ];
        for from in ALL {
            for to in ALL {
                let result = ProjectStatus::validate_transition(from, to);
                if allowed.contains(&(from, to)) {
                    assert!(result.is_ok(), "{:?} -> {:?} should be allowed", from, to);
                } else {
                    assert!(result.is_err(), "{:?} -> {:?} should be rejected", from, to);
                }
            }
        }
    }

    #[test]
    fn self_transition_is_redundant_not_noop() {
        assert_eq!(
            ProjectStatus::validate_transition(ProjectStatus::Scheduled, ProjectStatus::Scheduled),
            Err(TransitionError::Redundant(ProjectStatus::Scheduled))
        );
    }

    #[test]
    fn invalid_transition_names_both_endpoints() {
        let err = ProjectStatus::validate_transition(
            ProjectStatus::Scheduled,
            ProjectStatus::Completed,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid status transition from Scheduled to Completed"
        );
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [ProjectStatus::Completed, ProjectStatus::Cancelled] {
            for to in ALL {
                assert!(ProjectStatus::validate_transition(from, to).is_err());
            }
        }
    }

    #[test]
    fn parse_accepts_both_separators_and_emits_canonical() {
        let parsed = ProjectStatus::parse("in-progress").unwrap();
        assert_eq!(parsed, ProjectStatus::InProgress);
        assert_eq!(parsed.as_str(), "in_progress");
        assert_eq!(ProjectStatus::parse("IN_PROGRESS"), Some(ProjectStatus::InProgress));
    }

    #[test]
    fn balance_due_before_deposit_is_full_total() {
        assert_eq!(project("500", Some("137.50"), false, false).balance_due(), dec("500"));
    }

    #[test]
    fn balance_due_after_deposit_subtracts_it() {
        assert_eq!(project("500", Some("137.50"), true, false).balance_due(), dec("362.50"));
    }

    #[test]
    fn balance_due_is_zero_once_balance_paid() {
        // Forced to zero regardless of stored amounts.
        assert_eq!(project("500", Some("9999"), true, true).balance_due(), Decimal::ZERO);
        assert_eq!(project("500", None, false, true).balance_due(), Decimal::ZERO);
    }

    #[test]
    fn balance_due_never_goes_negative() {
        assert_eq!(project("100", Some("150"), true, false).balance_due(), Decimal::ZERO);
    }
}
