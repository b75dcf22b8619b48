use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::models::lead_models::LeadSubmission;
use crate::utils::lead_email::LeadEmailTemplate;
use crate::utils::notifier::{Notifier, NotifyError};

pub const RESEND_API_URL: &str = "https://api.resend.com";

/// Sends lead notifications through Resend's HTTP API.
pub struct ResendNotifier {
    client: Client,
    api_url: String,
    api_key: String,
    from: String,
    to: String,
    template: LeadEmailTemplate,
}

impl ResendNotifier {
    pub fn new(client: Client, api_key: &str, from: &str, to: &str, template: LeadEmailTemplate) -> Self {
        Self {
            client,
            api_url: RESEND_API_URL.to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            template,
        }
    }

    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send(&self, submission: &LeadSubmission) -> Result<(), NotifyError> {
        let rendered = self.template.render(submission);
        let payload = json!({
            "from": self.from,
            "to": [self.to],
            "subject": rendered.subject,
            "html": rendered.html,
            "text": rendered.text,
        });

        let response = self
            .client
            .post(format!("{}/emails", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotifyError::Rejected { status, body });
        }

        tracing::info!("Lead notification sent to {} via Resend", self.to);
        Ok(())
    }
}
