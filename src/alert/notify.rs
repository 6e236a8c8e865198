//! Alert delivery channels.
//!
//! [`Notifier`] is the synchronous local channel (the UI plugs in here; the
//! default just logs). [`AlertMailer`] is the asynchronous email channel, with
//! [`SmtpMailer`] wrapping the `lettre` async SMTP transport.

use crate::alert::Alert;
use crate::config::SmtpConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Local, synchronous notification of a fired alert.
pub trait Notifier: Send + Sync {
    fn notify(&self, alert: &Alert);
}

/// [`Notifier`] writing alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, alert: &Alert) {
        tracing::warn!(server = %alert.server_name, kind = %alert.kind, "Alert triggered: {}", alert.message);
    }
}

/// Email delivery of a fired alert.
#[async_trait]
pub trait AlertMailer: Send + Sync {
    async fn send(&self, to: &str, alert: &Alert) -> Result<()>;
}

/// Sends alert emails via SMTP with STARTTLS.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AlertMailer for SmtpMailer {
    async fn send(&self, to: &str, alert: &Alert) -> Result<()> {
        let subject = format!("[Pulse Panel] {} alert: {}", alert.kind, alert.server_name);
        let body = format!(
            "Server: {}\nAlert: {}\nTime: {}\n\n{}",
            alert.server_name,
            alert.kind,
            alert.at.format("%Y-%m-%d %H:%M:%S"),
            alert.message
        );

        let from = self
            .config
            .from_address
            .parse()
            .map_err(|e| Error::Email(format!("Invalid sender address: {}", e)))?;
        let recipient = to
            .parse()
            .map_err(|e| Error::Email(format!("Invalid recipient address '{}': {}", to, e)))?;

        let email = Message::builder()
            .from(from)
            .to(recipient)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| Error::Email(e.to_string()))?;

        let mut transport_builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
            .map_err(|e| Error::Email(e.to_string()))?
            .port(self.config.port);

        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            transport_builder = transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        transport_builder
            .build()
            .send(email)
            .await
            .map_err(|e| Error::Email(e.to_string()))?;

        tracing::info!(to, server = %alert.server_name, "Alert email sent");
        Ok(())
    }
}
