//! SMTP sending via lettre

use chrono::Utc;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, Tokio1Executor};
use tracing::info;

use crate::config::{Credentials, MailConfig};
use crate::error::{Error, Result};
use crate::models::{DraftEmail, SentReceipt};

use super::generate_message_id;

/// SMTP sender for a single account
pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpSender {
    pub fn new(config: &MailConfig, credentials: &Credentials) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| Error::ConnectionFailed {
                host: config.smtp_host.clone(),
                reason: e.to_string(),
            })?
            .credentials(SmtpCredentials::new(
                credentials.email.clone(),
                credentials.app_password.clone(),
            ))
            .timeout(Some(std::time::Duration::from_secs(config.timeout_secs)))
            .build();

        Ok(Self {
            transport,
            from: credentials.email.clone(),
        })
    }

    /// Send a draft. Returns the receipt with the Message-ID assigned
    /// at send time.
    pub async fn send(&self, draft: &DraftEmail) -> Result<SentReceipt> {
        if draft.to.is_empty() {
            return Err(Error::InvalidEmailFormat(
                "Draft has no recipients".to_string(),
            ));
        }

        let from: Mailbox = self.from.parse().map_err(|e| {
            Error::InvalidEmailFormat(format!("Invalid sender address: {}", e))
        })?;

        let message_id = generate_message_id(&self.from);
        let mut builder = LettreMessage::builder()
            .from(from)
            .subject(draft.subject.clone())
            .message_id(Some(message_id.clone()));

        for recipient in &draft.to {
            let mailbox: Mailbox = recipient.parse().map_err(|e| {
                Error::InvalidEmailFormat(format!("Invalid recipient {}: {}", recipient, e))
            })?;
            builder = builder.to(mailbox);
        }

        if let Some(parent) = &draft.in_reply_to {
            builder = builder.in_reply_to(parent.clone()).references(parent.clone());
        }

        let message = builder
            .body(draft.body.clone())
            .map_err(|e| Error::InvalidEmailFormat(format!("Failed to build message: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(classify_smtp_error)?;

        info!("Sent {} to {} recipient(s)", message_id, draft.to.len());
        Ok(SentReceipt {
            id: message_id,
            to: draft.to.clone(),
            subject: draft.subject.clone(),
            body: draft.body.clone(),
            sent_at: Utc::now(),
        })
    }
}

/// Map an SMTP failure to the error taxonomy. Provider throttle
/// responses become Quota; everything else is Transport.
fn classify_smtp_error(e: lettre::transport::smtp::Error) -> Error {
    let text = e.to_string();
    let lowered = text.to_lowercase();
    if lowered.contains("quota")
        || lowered.contains("rate limit")
        || lowered.contains("too many")
        || lowered.contains("4.7.")
        || lowered.contains("5.4.5")
    {
        Error::Quota(text)
    } else {
        Error::Transport(format!("SMTP send failed: {}", text))
    }
}
