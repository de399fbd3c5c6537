//! Notification emails as data.
//!
//! State-changing operations never send email inline. They return the
//! notifications the change calls for, and the dispatcher delivers them
//! best-effort afterwards. A failed send is recorded in the outcome and in
//! metrics but never rolls back the state change that produced it.

use crate::models::{Invoice, InvoiceType, Quote};
use crate::services::email::{EmailMessage, EmailProvider};
use crate::services::metrics::EMAILS_TOTAL;
use rust_decimal::Decimal;
use tracing::warn;

/// A notification owed to someone after a state change.
#[derive(Debug, Clone)]
pub enum Notification {
    /// Customer: your quote is ready, here is the acceptance link.
    QuoteReady {
        to: String,
        customer_name: String,
        service_label: String,
        amount: Decimal,
        valid_until: Option<chrono::NaiveDate>,
        accept_url: String,
    },
    /// Owner: copy of a quote that went out.
    OwnerQuoteCopy {
        quote_id: i64,
        customer_name: String,
        customer_email: String,
        service_label: String,
        amount: Decimal,
    },
    /// Customer: an invoice is ready to pay.
    PaymentRequested {
        to: String,
        customer_name: String,
        invoice_type: InvoiceType,
        amount: Decimal,
        due_date: Option<chrono::NaiveDate>,
        pay_url: String,
    },
    /// Owner: a customer accepted a quote and a project now exists.
    OwnerAcceptedNotice {
        quote_id: i64,
        project_id: i64,
        customer_name: String,
        service_label: String,
        amount: Decimal,
    },
    /// Customer: the work is done.
    ProjectCompleted {
        to: String,
        customer_name: String,
        service_label: String,
    },
    /// Customer: first completed project, ask for a review.
    FeedbackRequest {
        to: String,
        customer_name: String,
    },
    /// Customer: the project was cancelled and open invoices voided.
    ProjectCancelled {
        to: String,
        customer_name: String,
        service_label: String,
    },
    /// Customer: receipt for a settled invoice.
    PaymentReceipt {
        to: String,
        customer_name: String,
        invoice_type: InvoiceType,
        amount: Decimal,
    },
}

/// Per-notification delivery outcome, reported back to API callers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DispatchOutcome {
    pub kind: &'static str,
    pub sent: bool,
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::QuoteReady { .. } => "quote_ready",
            Notification::OwnerQuoteCopy { .. } => "owner_quote_copy",
            Notification::PaymentRequested { .. } => "payment_requested",
            Notification::OwnerAcceptedNotice { .. } => "owner_accepted_notice",
            Notification::ProjectCompleted { .. } => "project_completed",
            Notification::FeedbackRequest { .. } => "feedback_request",
            Notification::ProjectCancelled { .. } => "project_cancelled",
            Notification::PaymentReceipt { .. } => "payment_receipt",
        }
    }

    /// Render to a deliverable message. Owner-directed notifications take
    /// their recipient from configuration.
    pub fn render(&self, owner_email: &str) -> EmailMessage {
        match self {
            Notification::QuoteReady {
                to,
                customer_name,
                service_label,
                amount,
                valid_until,
                accept_url,
            } => {
                let validity = match valid_until {
                    Some(d) => format!("This quote is valid until {}.", d.format("%B %-d, %Y")),
                    None => String::new(),
                };
                EmailMessage {
                    to: to.clone(),
                    subject: format!("Your {} quote is ready", service_label),
                    body: format!(
                        "Hi {},\n\n\
                         Your quote for {} is ready: ${}.\n\n\
                         Review and accept it here:\n{}\n\n\
                         {}\n",
                        customer_name, service_label, amount, accept_url, validity
                    ),
                }
            }
            Notification::OwnerQuoteCopy {
                quote_id,
                customer_name,
                customer_email,
                service_label,
                amount,
            } => EmailMessage {
                to: owner_email.to_string(),
                subject: format!("Quote #{} sent to {}", quote_id, customer_name),
                body: format!(
                    "Quote #{} for {} (${}) was sent to {} <{}>.\n",
                    quote_id, service_label, amount, customer_name, customer_email
                ),
            },
            Notification::PaymentRequested {
                to,
                customer_name,
                invoice_type,
                amount,
                due_date,
                pay_url,
            } => {
                let what = match invoice_type {
                    InvoiceType::Deposit => "deposit",
                    InvoiceType::Balance => "remaining balance",
                    InvoiceType::Additional => "additional charge",
                    InvoiceType::Full => "payment",
                };
                let due = match due_date {
                    Some(d) => format!(" by {}", d.format("%B %-d, %Y")),
                    None => String::new(),
                };
                EmailMessage {
                    to: to.clone(),
                    subject: format!("Payment requested: ${}", amount),
                    body: format!(
                        "Hi {},\n\n\
                         Your {} of ${} is due{}.\n\n\
                         Pay securely here:\n{}\n",
                        customer_name, what, amount, due, pay_url
                    ),
                }
            }
            Notification::OwnerAcceptedNotice {
                quote_id,
                project_id,
                customer_name,
                service_label,
                amount,
            } => EmailMessage {
                to: owner_email.to_string(),
                subject: format!("{} accepted quote #{}", customer_name, quote_id),
                body: format!(
                    "{} accepted quote #{} for {} (${}).\n\
                     Project #{} is scheduled.\n",
                    customer_name, quote_id, service_label, amount, project_id
                ),
            },
            Notification::ProjectCompleted {
                to,
                customer_name,
                service_label,
            } => EmailMessage {
                to: to.clone(),
                subject: format!("Your {} project is complete", service_label),
                body: format!(
                    "Hi {},\n\n\
                     Your {} project is finished. Thank you for your business!\n",
                    customer_name, service_label
                ),
            },
            Notification::FeedbackRequest { to, customer_name } => EmailMessage {
                to: to.clone(),
                subject: "How did we do?".to_string(),
                body: format!(
                    "Hi {},\n\n\
                     Thanks for choosing us for your first project. \
                     We'd love to hear how it went. Just reply to this email.\n",
                    customer_name
                ),
            },
            Notification::ProjectCancelled {
                to,
                customer_name,
                service_label,
            } => EmailMessage {
                to: to.clone(),
                subject: format!("Your {} project was cancelled", service_label),
                body: format!(
                    "Hi {},\n\n\
                     Your {} project has been cancelled and any unpaid invoices \
                     for it have been voided. Nothing further is due.\n",
                    customer_name, service_label
                ),
            },
            Notification::PaymentReceipt {
                to,
                customer_name,
                invoice_type,
                amount,
            } => EmailMessage {
                to: to.clone(),
                subject: format!("Receipt: ${} received", amount),
                body: format!(
                    "Hi {},\n\n\
                     We received your {} payment of ${}. Thank you!\n",
                    customer_name, invoice_type.as_str(), amount
                ),
            },
        }
    }
}

/// Deliver a batch of notifications best-effort, one outcome per message.
pub async fn dispatch(
    provider: &dyn EmailProvider,
    owner_email: &str,
    notifications: Vec<Notification>,
) -> Vec<DispatchOutcome> {
    let mut outcomes = Vec::with_capacity(notifications.len());

    for notification in notifications {
        let kind = notification.kind();
        let message = notification.render(owner_email);

        let sent = match provider.send(&message).await {
            Ok(()) => {
                EMAILS_TOTAL.with_label_values(&[kind, "sent"]).inc();
                true
            }
            Err(e) => {
                EMAILS_TOTAL.with_label_values(&[kind, "failed"]).inc();
                warn!(kind = kind, to = %message.to, error = %e, "Notification send failed");
                false
            }
        };

        outcomes.push(DispatchOutcome { kind, sent });
    }

    outcomes
}

/// Build the customer-facing notifications owed after a project completes.
pub fn on_project_completed(
    customer_name: &str,
    customer_email: &str,
    service_label: &str,
    balance_invoice: Option<(&Invoice, String)>,
    first_completion: bool,
) -> Vec<Notification> {
    let mut notifications = vec![Notification::ProjectCompleted {
        to: customer_email.to_string(),
        customer_name: customer_name.to_string(),
        service_label: service_label.to_string(),
    }];

    if let Some((invoice, pay_url)) = balance_invoice {
        notifications.push(Notification::PaymentRequested {
            to: customer_email.to_string(),
            customer_name: customer_name.to_string(),
            invoice_type: invoice.invoice_type(),
            amount: invoice.amount,
            due_date: invoice.due_date,
            pay_url,
        });
    }

    if first_completion {
        notifications.push(Notification::FeedbackRequest {
            to: customer_email.to_string(),
            customer_name: customer_name.to_string(),
        });
    }

    notifications
}

/// Build the notifications owed after a quote is priced and sent. The
/// recipient address is passed in resolved form since the quote's own
/// contact email is optional.
pub fn on_quote_sent(quote: &Quote, to: &str, service_label: &str, accept_url: String) -> Vec<Notification> {
    let amount = quote.amount.unwrap_or(Decimal::ZERO);
    vec![
        Notification::QuoteReady {
            to: to.to_string(),
            customer_name: quote.contact_name.clone(),
            service_label: service_label.to_string(),
            amount,
            valid_until: quote.valid_until.map(|d| d.date_naive()),
            accept_url,
        },
        Notification::OwnerQuoteCopy {
            quote_id: quote.quote_id,
            customer_name: quote.contact_name.clone(),
            customer_email: to.to_string(),
            service_label: service_label.to_string(),
            amount,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::email::MockEmailProvider;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn dispatch_reports_per_message_outcomes() {
        let provider = MockEmailProvider::new();
        let notifications = vec![
            Notification::FeedbackRequest {
                to: "a@example.com".to_string(),
                customer_name: "Ana".to_string(),
            },
            Notification::PaymentReceipt {
                to: "a@example.com".to_string(),
                customer_name: "Ana".to_string(),
                invoice_type: InvoiceType::Deposit,
                amount: dec("137.50"),
            },
        ];

        let outcomes = dispatch(&provider, "owner@example.com", notifications).await;

        assert_eq!(
            outcomes,
            vec![
                DispatchOutcome { kind: "feedback_request", sent: true },
                DispatchOutcome { kind: "payment_receipt", sent: true },
            ]
        );
        assert_eq!(provider.sent_messages().len(), 2);
    }

    #[tokio::test]
    async fn dispatch_failure_is_reported_not_raised() {
        let provider = MockEmailProvider::new();
        provider.set_failing(true);

        let outcomes = dispatch(
            &provider,
            "owner@example.com",
            vec![Notification::FeedbackRequest {
                to: "a@example.com".to_string(),
                customer_name: "Ana".to_string(),
            }],
        )
        .await;

        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].sent);
    }

    #[test]
    fn owner_notifications_go_to_owner() {
        let notification = Notification::OwnerAcceptedNotice {
            quote_id: 42,
            project_id: 7,
            customer_name: "Ana".to_string(),
            service_label: "Flower Beds".to_string(),
            amount: dec("275"),
        };
        let message = notification.render("owner@example.com");
        assert_eq!(message.to, "owner@example.com");
        assert!(message.subject.contains("42"));
        assert!(message.body.contains("Project #7"));
    }

    #[test]
    fn payment_request_includes_link_and_due_date() {
        let notification = Notification::PaymentRequested {
            to: "a@example.com".to_string(),
            customer_name: "Ana".to_string(),
            invoice_type: InvoiceType::Balance,
            amount: dec("362.50"),
            due_date: Some("2026-03-15".parse().unwrap()),
            pay_url: "https://portal.example.com/pay/9".to_string(),
        };
        let message = notification.render("owner@example.com");
        assert!(message.body.contains("remaining balance"));
        assert!(message.body.contains("https://portal.example.com/pay/9"));
        assert!(message.body.contains("March 15, 2026"));
    }
}
