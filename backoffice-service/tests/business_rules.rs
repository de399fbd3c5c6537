//! Business-rule checks against the public library surface.

use backoffice_service::config::PaymentsConfig;
use backoffice_service::models::{
    balance_due_date, deposit_due_date, round2, to_minor_units, DepositPolicy, InvoiceType,
    ProjectStatus, QuoteNotes, ServiceType,
};
use backoffice_service::services::lifecycle::{paid_flags_for, validate_quote_amount};
use backoffice_service::services::payments::PaymentClient;
use backoffice_service::services::tokens::{AcceptanceTokens, MockTokenStore};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use secrecy::Secret;

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

#[test]
fn accepted_quote_splits_fifty_fifty() {
    // A $275 quote takes a $137.50 deposit and leaves $137.50 due.
    let total = dec("275.00");
    let deposit = round2(total * dec("0.5"));
    assert_eq!(deposit, dec("137.50"));
    assert_eq!(total - deposit, dec("137.50"));
    assert_eq!(to_minor_units(deposit).unwrap(), 13750);
}

#[test]
fn pricing_accepts_only_the_fifty_to_ten_thousand_range() {
    // Bounds are inclusive; rejection happens before any row is touched.
    assert!(validate_quote_amount(dec("49.99")).is_err());
    assert_eq!(validate_quote_amount(dec("50")).unwrap(), dec("50.00"));
    assert_eq!(validate_quote_amount(dec("275")).unwrap(), dec("275.00"));
    assert_eq!(validate_quote_amount(dec("10000")).unwrap(), dec("10000.00"));
    assert!(validate_quote_amount(dec("10000.01")).is_err());
}

#[test]
fn deposit_invoice_is_due_within_three_days_of_acceptance() {
    // Acceptance creates the project unscheduled, so the grace window rules.
    let due = deposit_due_date(date("2026-08-29"), None);
    assert_eq!(due, date("2026-09-01"));
}

#[test]
fn balance_invoice_due_tracks_schedule_else_a_week() {
    assert_eq!(
        balance_due_date(date("2026-08-29"), Some(date("2026-09-20"))),
        date("2026-09-20")
    );
    assert_eq!(balance_due_date(date("2026-08-29"), None), date("2026-09-05"));
}

#[test]
fn install_services_take_deposits_maintenance_does_not() {
    assert_eq!(ServiceType::FlowerBeds.deposit_policy(), DepositPolicy::Required);
    assert_eq!(ServiceType::PressureWashing.deposit_policy(), DepositPolicy::Required);
    assert_eq!(ServiceType::LawnCare.deposit_policy(), DepositPolicy::NotAllowed);
}

#[test]
fn terminal_projects_reject_every_exit() {
    for from in [ProjectStatus::Completed, ProjectStatus::Cancelled] {
        for to in [
            ProjectStatus::Scheduled,
            ProjectStatus::InProgress,
            ProjectStatus::Completed,
            ProjectStatus::Cancelled,
        ] {
            assert!(ProjectStatus::validate_transition(from, to).is_err());
        }
    }
}

#[test]
fn skipping_in_progress_names_the_bad_edge() {
    let err =
        ProjectStatus::validate_transition(ProjectStatus::Scheduled, ProjectStatus::Completed)
            .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid status transition from Scheduled to Completed"
    );
}

#[test]
fn settled_invoice_types_flip_the_right_flags() {
    assert_eq!(paid_flags_for(InvoiceType::Deposit), (true, false));
    assert_eq!(paid_flags_for(InvoiceType::Balance), (false, true));
    assert_eq!(paid_flags_for(InvoiceType::Full), (true, true));
    assert_eq!(paid_flags_for(InvoiceType::Additional), (false, false));
}

#[test]
fn quote_notes_survive_storage() {
    let notes = QuoteNotes {
        notes: Some("Includes mulch".to_string()),
        timeline: Some("Two weeks out".to_string()),
        terms: Some("50% deposit to book".to_string()),
    };
    let packed = notes.pack().unwrap();
    assert_eq!(QuoteNotes::unpack(&packed), notes);
}

#[tokio::test]
async fn consumed_token_cannot_be_reused() {
    let store = MockTokenStore::new();
    let token = store.issue(42, 3600).await.unwrap();
    assert_eq!(store.resolve(&token).await.unwrap(), Some(42));

    store.consume(&token, 42).await.unwrap();
    assert_eq!(store.resolve(&token).await.unwrap(), None);
}

#[tokio::test]
async fn resending_a_quote_kills_the_old_link() {
    let store = MockTokenStore::new();
    let first = store.issue(42, 3600).await.unwrap();
    let second = store.issue(42, 3600).await.unwrap();

    assert_eq!(store.resolve(&first).await.unwrap(), None);
    assert_eq!(store.resolve(&second).await.unwrap(), Some(42));
}

#[test]
fn replayed_webhook_signature_is_rejected() {
    let client = PaymentClient::new(PaymentsConfig {
        secret_key: Secret::new("sk_test".to_string()),
        webhook_secret: Secret::new("whsec_test".to_string()),
        api_base_url: "https://api.example.com/v1".to_string(),
        currency: "usd".to_string(),
    });

    // A header captured now should not verify ten minutes later.
    let body = r#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{}}}"#;
    assert!(!client
        .verify_webhook_signature(body, "t=1700000000,v1=0000", 1_700_000_000 + 600)
        .unwrap());
}
