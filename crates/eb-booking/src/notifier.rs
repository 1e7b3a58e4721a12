//! Attendee notifications.
//!
//! Delivery is always best-effort: workflows call [`notify_best_effort`],
//! which logs and counts failures but never returns them.

use async_trait::async_trait;
use eb_common::RegistrationStatus;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, warn};

use crate::names;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub event_name: String,
    pub status: RegistrationStatus,
    pub recipient: String,
    pub timeout_minutes: i32,
}

impl Notification {
    pub fn subject(&self) -> &'static str {
        match self.status {
            RegistrationStatus::Pending => "Your registration has been received",
            RegistrationStatus::Confirmed => "Your registration is confirmed",
            RegistrationStatus::Canceled => "Your registration has been canceled",
        }
    }

    pub fn body(&self) -> String {
        match self.status {
            RegistrationStatus::Pending => format!(
                "Hello!\n\nYou have started registering for \"{}\". \
                 Please confirm within {} minutes, otherwise your registration will be canceled.",
                self.event_name, self.timeout_minutes
            ),
            RegistrationStatus::Confirmed => format!(
                "Hello!\n\nYour registration for \"{}\" is confirmed. See you there!",
                self.event_name
            ),
            RegistrationStatus::Canceled => format!(
                "Hello!\n\nYour registration for \"{}\" was canceled \
                 because it was not confirmed in time.",
                self.event_name
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("invalid address: {0}")]
    Address(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Send and swallow failures.
pub async fn notify_best_effort(notifier: &dyn Notifier, notification: &Notification) {
    if let Err(e) = notifier.send(notification).await {
        let status = notification.status.as_str();
        metrics::counter!(names::NOTIFICATION_FAILURES_TOTAL, "status" => status).increment(1);
        warn!(
            recipient = %notification.recipient,
            status = %notification.status,
            error = %e,
            "Failed to deliver notification"
        );
    }
}

/// Writes notifications to the log instead of delivering them
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        info!(
            recipient = %notification.recipient,
            status = %notification.status,
            event_name = %notification.event_name,
            subject = notification.subject(),
            "Notification"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, _notification: &Notification) -> Result<(), NotificationError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self, NotificationError> {
        let from: Mailbox = format!("{} <{}>", settings.from_name, settings.from_email)
            .parse()
            .map_err(|e| NotificationError::Address(format!("invalid from address: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
            .map_err(|e| NotificationError::Build(format!("SMTP relay error: {e}")))?
            .port(settings.port);
        if !settings.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ));
        }

        info!(host = %settings.host, port = settings.port, "SMTP notifier configured");
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

pub fn build_message(
    from: &Mailbox,
    notification: &Notification,
) -> Result<Message, NotificationError> {
    let to: Mailbox = notification
        .recipient
        .parse()
        .map_err(|e| NotificationError::Address(format!("invalid recipient: {e}")))?;

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(notification.subject())
        .header(ContentType::TEXT_PLAIN)
        .body(notification.body())
        .map_err(|e| NotificationError::Build(e.to_string()))
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let message = build_message(&self.from, notification)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;
        info!(recipient = %notification.recipient, status = %notification.status, "Email sent");
        Ok(())
    }
}
