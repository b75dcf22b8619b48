use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::models::lead_models::{ActionType, LeadSubmission};

/// Subject and bodies of one lead notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedNotification {
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct LeadEmailTemplate {
    site_name: String,
    timezone: Tz,
}

pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn whatsapp_digits(whatsapp: &str) -> String {
    whatsapp.chars().filter(|c| c.is_ascii_digit()).collect()
}

impl LeadEmailTemplate {
    pub fn new(site_name: &str, timezone: Tz) -> Self {
        Self {
            site_name: site_name.to_string(),
            timezone,
        }
    }

    pub fn format_timestamp(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.timezone)
            .format("%-m/%-d/%Y, %-I:%M:%S %p %Z")
            .to_string()
    }

    pub fn render(&self, submission: &LeadSubmission) -> RenderedNotification {
        let label = submission.action_type().label();
        let subject = format!("New {} Request - {}", label, self.site_name);
        let timestamp = self.format_timestamp(submission.submitted_at());
        let (badge_bg, badge_fg) = match submission.action_type() {
            ActionType::Immediate => ("#dcfce7", "#166534"),
            ActionType::Enquiry => ("#dbeafe", "#1e40af"),
        };

        let services_html = submission
            .services()
            .iter()
            .map(|s| format!("&#10003; {}", escape_html(s)))
            .collect::<Vec<_>>()
            .join("<br>");
        let email = escape_html(submission.email());
        let whatsapp = escape_html(submission.whatsapp());
        let site_name = escape_html(&self.site_name);

        let html = format!(
            r##"<!DOCTYPE html>
<html>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
  <div style="background: linear-gradient(135deg, #0163c6 0%, #073265 100%); color: white; padding: 30px; border-radius: 12px 12px 0 0; text-align: center;">
    <h1 style="margin: 0; font-size: 24px;">New Lead Submission</h1>
    <p style="margin: 10px 0 0 0; opacity: 0.9;">{site_name} Website</p>
  </div>
  <div style="background: #f9fafb; padding: 30px; border: 1px solid #e5e7eb; border-top: none;">
    <h3>Action Type</h3>
    <span style="display: inline-block; padding: 6px 12px; border-radius: 20px; font-size: 12px; font-weight: 600; text-transform: uppercase; background: {badge_bg}; color: {badge_fg};">{label}</span>
    <h3>Services Requested</h3>
    <div style="background: white; padding: 16px; border-radius: 8px;">{services_html}</div>
    <h3>Contact Information</h3>
    <p>EMAIL: <a href="mailto:{email}" style="color: #0163c6;">{email}</a></p>
    <p>WHATSAPP: <a href="https://wa.me/{wa_digits}" style="color: #0163c6;">{whatsapp}</a></p>
    <h3>Timestamp</h3>
    <p>{timestamp}</p>
  </div>
  <div style="text-align: center; padding: 20px; color: #6b7280; font-size: 12px;">
    <p>This is an automated notification from the {site_name} website.</p>
    <p>Please follow up with this lead promptly.</p>
  </div>
</body>
</html>"##,
            wa_digits = whatsapp_digits(submission.whatsapp()),
        );

        let services_text = submission
            .services()
            .iter()
            .map(|s| format!("- {}", s))
            .collect::<Vec<_>>()
            .join("\n");
        let text = format!(
            "New lead from the {} website\n\nAction type: {}\n\nServices requested:\n{}\n\nEmail: {}\nWhatsApp: {}\nSubmitted: {}\n",
            self.site_name,
            label,
            services_text,
            submission.email(),
            submission.whatsapp(),
            timestamp,
        );

        RenderedNotification { subject, html, text }
    }
}
