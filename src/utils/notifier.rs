use async_trait::async_trait;
use thiserror::Error;

use crate::models::lead_models::LeadSubmission;
use crate::utils::lead_email::LeadEmailTemplate;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Notification rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Notification endpoint unreachable: {0}")]
    Transport(String),
    #[error("Invalid notification: {0}")]
    InvalidMessage(String),
}

/// Tells a human that a lead arrived. One attempt; the caller decides what a
/// failure means.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, submission: &LeadSubmission) -> Result<(), NotifyError>;
}

/// Renders the notification and writes it to the log instead of sending it.
pub struct LogNotifier {
    template: LeadEmailTemplate,
    to: String,
}

impl LogNotifier {
    pub fn new(template: LeadEmailTemplate, to: &str) -> Self {
        Self {
            template,
            to: to.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, submission: &LeadSubmission) -> Result<(), NotifyError> {
        let rendered = self.template.render(submission);
        tracing::info!(
            "Lead notification for {}: {}\n{}",
            self.to,
            rendered.subject,
            rendered.text
        );
        Ok(())
    }
}
