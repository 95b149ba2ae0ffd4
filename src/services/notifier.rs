//! Notification dispatchers: in-app inbox, e-mail and log-only delivery

use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, Message},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};

use crate::{
    config::EmailConfig,
    error::{AppError, AppResult},
    models::{Notification, NotificationKind},
    repository::notifications::NotificationsRepository,
};

/// Delivers borrower-facing notifications. Delivery and its retries are the
/// dispatcher's concern; the engine never waits on it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: &Notification) -> AppResult<()>;
}

/// Stores notifications in the recipient's in-app inbox
pub struct InAppNotifier {
    repository: NotificationsRepository,
}

impl InAppNotifier {
    pub fn new(repository: NotificationsRepository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl NotificationDispatcher for InAppNotifier {
    async fn dispatch(&self, notification: &Notification) -> AppResult<()> {
        let id = self.repository.create(notification).await?;
        tracing::debug!(notification_id = id, recipient_id = notification.recipient_id, "In-app notification stored");
        Ok(())
    }
}

/// Sends notifications over SMTP to the address the identity provider holds
pub struct EmailNotifier {
    config: EmailConfig,
    recipients: NotificationsRepository,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig, recipients: NotificationsRepository) -> Self {
        Self { config, recipients }
    }

    fn subject(kind: NotificationKind) -> &'static str {
        match kind {
            NotificationKind::ReservationFulfillable => "Your reserved item is ready",
            NotificationKind::ReservationExpired => "Your reservation has expired",
            NotificationKind::LoanOverdue => "Your loan is overdue",
        }
    }

    fn build_message(&self, to: &str, notification: &Notification) -> AppResult<Message> {
        let from_name = self.config.smtp_from_name.as_deref().unwrap_or("Pustaka");
        let from = Mailbox::from_str(&format!("{} <{}>", from_name, self.config.smtp_from))
            .map_err(|e| AppError::Internal(format!("Invalid from address: {}", e)))?;
        let to = Mailbox::from_str(to)
            .map_err(|e| AppError::Internal(format!("Invalid to address: {}", e)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(Self::subject(notification.kind))
            .header(ContentType::TEXT_PLAIN)
            .body(notification.message.clone())
            .map_err(|e| AppError::Internal(format!("Failed to build email: {}", e)))
    }

    fn transport(&self) -> AppResult<SmtpTransport> {
        let builder = if self.config.smtp_use_tls {
            SmtpTransport::starttls_relay(&self.config.smtp_host)
                .map_err(|e| AppError::Internal(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            SmtpTransport::builder_dangerous(&self.config.smtp_host)
        }
        .port(self.config.smtp_port);

        let builder = match (&self.config.smtp_username, &self.config.smtp_password) {
            (Some(username), Some(password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            _ => builder,
        };

        Ok(builder.build())
    }
}

#[async_trait]
impl NotificationDispatcher for EmailNotifier {
    async fn dispatch(&self, notification: &Notification) -> AppResult<()> {
        let Some(to) = self.recipients.recipient_email(notification.recipient_id).await? else {
            tracing::debug!(recipient_id = notification.recipient_id, "No e-mail address on file; skipping");
            return Ok(());
        };

        let message = self.build_message(&to, notification)?;
        let mailer = self.transport()?;

        // SmtpTransport blocks
        tokio::task::spawn_blocking(move || mailer.send(&message))
            .await
            .map_err(|e| AppError::Internal(format!("E-mail task failed: {}", e)))?
            .map_err(|e| AppError::Internal(format!("Failed to send email: {}", e)))?;

        tracing::info!(recipient_id = notification.recipient_id, kind = notification.kind.as_str(), "Notification e-mail sent");
        Ok(())
    }
}

/// Writes notifications to the log only
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn dispatch(&self, notification: &Notification) -> AppResult<()> {
        tracing::info!(
            recipient_id = notification.recipient_id,
            item_id = notification.item_id,
            kind = notification.kind.as_str(),
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// Hands every notification to each inner dispatcher; one failing does not
/// stop the others.
pub struct FanOutNotifier {
    targets: Vec<Arc<dyn NotificationDispatcher>>,
}

impl FanOutNotifier {
    pub fn new(targets: Vec<Arc<dyn NotificationDispatcher>>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl NotificationDispatcher for FanOutNotifier {
    async fn dispatch(&self, notification: &Notification) -> AppResult<()> {
        let mut first_error = None;
        for target in &self.targets {
            if let Err(e) = target.dispatch(notification).await {
                tracing::warn!(recipient_id = notification.recipient_id, "Notification channel failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
