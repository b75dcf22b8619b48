use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::models::lead_models::LeadSubmission;
use crate::utils::lead_email::LeadEmailTemplate;
use crate::utils::notifier::{Notifier, NotifyError};

/// Sends lead notifications over an authenticated STARTTLS relay.
pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    template: LeadEmailTemplate,
}

impl SmtpNotifier {
    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        from: &str,
        to: &str,
        template: LeadEmailTemplate,
    ) -> Result<Self, NotifyError> {
        let from = parse_mailbox(from)?;
        let to = parse_mailbox(to)?;
        let credentials = Credentials::new(username.to_string(), password.to_string());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| NotifyError::Transport(e.to_string()))?
            .credentials(credentials)
            .port(port)
            .build();

        tracing::info!("SMTP Configuration - Server: {}, Port: {}", host, port);

        Ok(Self {
            mailer,
            from,
            to,
            template,
        })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address
        .parse()
        .map_err(|e| NotifyError::InvalidMessage(format!("bad address {}: {}", address, e)))
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, submission: &LeadSubmission) -> Result<(), NotifyError> {
        let rendered = self.template.render(submission);
        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(rendered.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(rendered.text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(rendered.html),
                    ),
            )
            .map_err(|e| NotifyError::InvalidMessage(e.to_string()))?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        tracing::info!("Lead notification sent to {} via SMTP", self.to);
        Ok(())
    }
}
