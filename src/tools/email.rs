//! SMTP email adapter
//!
//! Sends a multipart message (plain + HTML alternative, then attachments)
//! over STARTTLS. Missing credentials are reported at send time rather than
//! at startup.

use crate::config::EmailConfig;
use crate::error::AssistantError;
use crate::tools::{EmailAttachment, Mailer, OutgoingEmail};
use crate::Result;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

const MISSING_CREDENTIALS: &str =
    "EMAIL_USER and EMAIL_PASSWORD not found in environment. Please set them in .env";

pub struct SmtpMailer {
    config: Option<EmailConfig>,
}

impl SmtpMailer {
    pub fn new(config: Option<EmailConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<String> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| AssistantError::Config(MISSING_CREDENTIALS.to_string()))?;

        let message = build_message(&config.sender, email)?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| AssistantError::Email(e.to_string()))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        transport
            .send(message)
            .await
            .map_err(|e| AssistantError::Email(e.to_string()))?;

        info!(
            recipient = %email.recipient,
            attachments = email.attachments.len(),
            "Email sent"
        );
        Ok(format!("Successfully sent email to {}", email.recipient))
    }
}

/// Assemble the MIME message without sending it
pub fn build_message(sender: &str, email: &OutgoingEmail) -> Result<Message> {
    let from: Mailbox = sender
        .parse()
        .map_err(|e| AssistantError::Email(format!("invalid sender '{}': {}", sender, e)))?;
    let to: Mailbox = email.recipient.parse().map_err(|e| {
        AssistantError::Email(format!("invalid recipient '{}': {}", email.recipient, e))
    })?;

    let mut body = MultiPart::mixed().multipart(MultiPart::alternative_plain_html(
        email.body.clone(),
        render_html_body(&email.body),
    ));

    for attachment in &email.attachments {
        body = body.singlepart(to_part(attachment)?);
    }

    Message::builder()
        .from(from)
        .to(to)
        .subject(email.subject.clone())
        .multipart(body)
        .map_err(|e| AssistantError::Email(e.to_string()))
}

fn to_part(attachment: &EmailAttachment) -> Result<lettre::message::SinglePart> {
    let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
        AssistantError::Email(format!(
            "bad content type for {}: {}",
            attachment.filename, e
        ))
    })?;
    Ok(Attachment::new(attachment.filename.clone()).body(attachment.body.clone(), content_type))
}

/// Minimal HTML rendering of a plain-text report
pub fn render_html_body(text: &str) -> String {
    let paragraphs: String = text
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .map(|p| {
            let escaped = p
                .replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;")
                .replace('\n', "<br>\n");
            format!("<p>{}</p>\n", escaped)
        })
        .collect();

    format!(
        "<html><body style=\"font-family: Arial, sans-serif; line-height: 1.5\">\n{}</body></html>",
        paragraphs
    )
}
