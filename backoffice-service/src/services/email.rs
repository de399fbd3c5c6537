//! Email delivery behind a provider trait.

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use service_core::error::AppError;
use tracing::{info, instrument, warn};

/// A rendered email ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Email delivery operations.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError>;
}

/// SMTP provider using lettre's async transport.
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpProvider {
    pub fn new(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        from_email: &str,
        from_name: &str,
    ) -> Result<Self, AppError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| AppError::EmailError(format!("SMTP relay setup failed: {}", e)))?
            .port(port);

        if !user.is_empty() {
            builder = builder.credentials(Credentials::new(user.to_string(), password.to_string()));
        }

        let from = format!("{} <{}>", from_name, from_email)
            .parse()
            .map_err(|e| AppError::EmailError(format!("Invalid from address: {}", e)))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    #[instrument(skip(self, message), fields(subject = %message.subject))]
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError> {
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| AppError::EmailError(format!("Invalid recipient address: {}", e)))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&message.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| AppError::EmailError(format!("Failed to build email: {}", e)))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| AppError::EmailError(format!("SMTP send failed: {}", e)))?;

        info!(to = %message.to, "Email sent");

        Ok(())
    }
}

/// No-op provider used when SMTP is disabled. Logs instead of sending.
pub struct DisabledEmailProvider;

#[async_trait]
impl EmailProvider for DisabledEmailProvider {
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError> {
        warn!(to = %message.to, subject = %message.subject, "SMTP disabled, email not sent");
        Ok(())
    }
}

/// In-memory provider for tests. Records every message and can be made to
/// fail to exercise best-effort dispatch paths.
pub struct MockEmailProvider {
    pub sent: std::sync::Mutex<Vec<EmailMessage>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl MockEmailProvider {
    pub fn new() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn sent_messages(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for MockEmailProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmailProvider for MockEmailProvider {
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AppError::EmailError("mock send failure".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_records_sent_messages() {
        let provider = MockEmailProvider::new();
        let msg = EmailMessage {
            to: "customer@example.com".to_string(),
            subject: "Your quote is ready".to_string(),
            body: "Hello".to_string(),
        };
        provider.send(&msg).await.unwrap();

        let sent = provider.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], msg);
    }

    #[tokio::test]
    async fn mock_failure_surfaces_email_error() {
        let provider = MockEmailProvider::new();
        provider.set_failing(true);
        let msg = EmailMessage {
            to: "customer@example.com".to_string(),
            subject: "x".to_string(),
            body: "y".to_string(),
        };
        let err = provider.send(&msg).await.unwrap_err();
        assert!(matches!(err, AppError::EmailError(_)));
    }
}
