//! Notification dispatchers for alerts

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;

use crate::config::{MailConfig, SmtpSettings};

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);
const IMPLICIT_TLS_PORT: u16 = 465;

/// An outbound message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Best-effort send interface the monitor dispatches through
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Short name used in logs
    fn kind(&self) -> &'static str;

    async fn send(&self, notification: &Notification) -> Result<(), DispatchError>;
}

/// Pick the dispatcher configured for this process: SMTP when a relay host
/// is set, then a webhook, otherwise log-only.
///
/// SMTP needs `sender` to be a real mailbox; a bare login such as `apikey`
/// is rejected here rather than on every send.
pub fn dispatcher_from_config(
    config: &MailConfig,
    sender: &str,
) -> Result<Arc<dyn Dispatcher>, DispatchError> {
    if let Some(smtp) = &config.smtp {
        parse_mailbox(sender)?;
        return Ok(Arc::new(SmtpDispatcher::new(smtp)?));
    }
    if let Some(url) = &config.webhook_url {
        return Ok(Arc::new(WebhookDispatcher::new(url.clone())));
    }
    Ok(Arc::new(LogDispatcher))
}

// ============================================================================
// SMTP
// ============================================================================

pub struct SmtpDispatcher {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    relay: String,
}

impl SmtpDispatcher {
    pub fn new(settings: &SmtpSettings) -> Result<Self, DispatchError> {
        let builder = if settings.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        }
        .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let mut builder = builder.port(settings.port).timeout(Some(SMTP_TIMEOUT));
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            relay: format!("{}:{}", settings.host, settings.port),
        })
    }
}

#[async_trait]
impl Dispatcher for SmtpDispatcher {
    fn kind(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, notification: &Notification) -> Result<(), DispatchError> {
        let message = build_message(notification)?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        tracing::info!(
            relay = %self.relay,
            recipients = notification.to.len(),
            code = %response.code(),
            "Alert email sent"
        );
        Ok(())
    }
}

/// Build a plain-text email from a notification
pub fn build_message(notification: &Notification) -> Result<Message, DispatchError> {
    if notification.to.is_empty() {
        return Err(DispatchError::NoRecipients);
    }

    let mut builder = Message::builder()
        .from(parse_mailbox(&notification.from)?)
        .subject(notification.subject.clone())
        .header(ContentType::TEXT_PLAIN);

    for to in &notification.to {
        builder = builder.to(parse_mailbox(to)?);
    }

    builder
        .body(notification.body.clone())
        .map_err(|e| DispatchError::Message(e.to_string()))
}

fn parse_mailbox(raw: &str) -> Result<Mailbox, DispatchError> {
    raw.parse::<Mailbox>()
        .map_err(|e| DispatchError::Address(format!("'{}': {}", raw, e)))
}

// ============================================================================
// Webhook
// ============================================================================

pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, url }
    }
}

#[async_trait]
impl Dispatcher for WebhookDispatcher {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<(), DispatchError> {
        let payload = serde_json::json!({
            "from": notification.from,
            "to": notification.to,
            "subject": notification.subject,
            "body": notification.body,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DispatchError::Webhook(format!("Failed to send webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(DispatchError::Webhook(format!(
                "Webhook returned status {}",
                response.status()
            )));
        }

        tracing::debug!(url = %self.url, "Webhook notification sent");
        Ok(())
    }
}

// ============================================================================
// Log
// ============================================================================

/// Writes notifications to the log. Used when no transport is configured.
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    fn kind(&self) -> &'static str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<(), DispatchError> {
        tracing::warn!(
            subject = %notification.subject,
            recipients = ?notification.to,
            "{}",
            notification.body
        );
        Ok(())
    }
}

/// Dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No recipients configured")]
    NoRecipients,

    #[error("Invalid address {0}")]
    Address(String),

    #[error("Could not build message: {0}")]
    Message(String),

    #[error("SMTP transport error: {0}")]
    Transport(String),

    #[error("Webhook error: {0}")]
    Webhook(String),
}
