use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// Named values substituted into a notification template.
pub type TemplateArgs = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationError {
    #[error("unknown template: {0}")]
    UnknownTemplate(String),
    #[error("no recipients")]
    NoRecipients,
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Outbound notifications (email, chat, ...).
///
/// Callers treat this as fire-and-log: a failure is reported back but must
/// never undo the work that triggered the notification.
pub trait NotificationService: Send + Sync {
    fn notify(
        &self,
        template: &str,
        locale: &str,
        recipients: &[String],
        args: &TemplateArgs,
    ) -> Result<(), NotificationError>;
}

impl<N> NotificationService for std::sync::Arc<N>
where
    N: NotificationService + ?Sized,
{
    fn notify(
        &self,
        template: &str,
        locale: &str,
        recipients: &[String],
        args: &TemplateArgs,
    ) -> Result<(), NotificationError> {
        (**self).notify(template, locale, recipients, args)
    }
}

/// A notification accepted by [`LoggingNotificationService`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentNotification {
    pub template: String,
    pub locale: String,
    pub recipients: Vec<String>,
    pub args: TemplateArgs,
    pub sent_at: DateTime<Utc>,
}

/// Notification service for tests/dev: logs and remembers what it was asked to send.
#[derive(Debug, Default)]
pub struct LoggingNotificationService {
    sent: RwLock<Vec<SentNotification>>,
}

impl LoggingNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.read().map(|s| s.clone()).unwrap_or_default()
    }
}

impl NotificationService for LoggingNotificationService {
    fn notify(
        &self,
        template: &str,
        locale: &str,
        recipients: &[String],
        args: &TemplateArgs,
    ) -> Result<(), NotificationError> {
        if recipients.is_empty() {
            return Err(NotificationError::NoRecipients);
        }

        info!(template, locale, recipients = recipients.len(), "notification sent");
        self.sent
            .write()
            .map_err(|_| NotificationError::Delivery("notification log poisoned".to_string()))?
            .push(SentNotification {
                template: template.to_string(),
                locale: locale.to_string(),
                recipients: recipients.to_vec(),
                args: args.clone(),
                sent_at: Utc::now(),
            });
        Ok(())
    }
}
