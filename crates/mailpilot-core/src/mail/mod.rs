//! Mail gateway: IMAP fetch/draft and SMTP send
//!
//! The only module that touches mail protocols. Every body leaves here
//! already sanitized; raw bytes never reach the agent loop.

mod imap;
mod smtp;

use async_trait::async_trait;

pub use imap::ImapMailbox;
pub use smtp::SmtpSender;

use chrono::Utc;

use crate::config::{Credentials, MailConfig};
use crate::error::Result;
use crate::models::{DraftEmail, Message, SentReceipt};

/// Generate a unique Message-ID under the account's domain
pub(crate) fn generate_message_id(account: &str) -> String {
    let domain = account.rsplit('@').next().unwrap_or("localhost");
    format!(
        "<{}.{}@{}>",
        Utc::now().timestamp_micros(),
        std::process::id(),
        domain
    )
}

/// Criteria for an inbox fetch
#[derive(Debug, Clone, Default)]
pub struct FetchFilter {
    /// Folder to fetch from; the configured default when None
    pub folder: Option<String>,

    /// Maximum messages to return; the configured default when None
    pub max_count: Option<usize>,

    /// Only messages on or after this date
    pub since: Option<chrono::NaiveDate>,

    /// Only unseen messages
    pub unread_only: bool,

    /// Only messages from this sender address
    pub from: Option<String>,
}

/// Mail protocol seam. The tool layer depends on this trait so tests
/// can run against an in-memory mailbox.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Fetch messages matching `filter`, newest first, bodies sanitized.
    async fn fetch_messages(&self, filter: &FetchFilter) -> Result<Vec<Message>>;

    /// Store a draft in the drafts folder. Returns the draft Message-ID.
    async fn save_draft(&self, draft: &DraftEmail) -> Result<String>;

    /// Send a message. Returns the provider receipt.
    async fn send(&self, draft: &DraftEmail) -> Result<SentReceipt>;
}

/// Production transport: IMAP for reads and drafts, SMTP for sends
pub struct MailGateway {
    imap: ImapMailbox,
    smtp: SmtpSender,
}

impl MailGateway {
    pub fn new(config: &MailConfig, credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            imap: ImapMailbox::new(config, credentials),
            smtp: SmtpSender::new(config, credentials)?,
        })
    }
}

#[async_trait]
impl MailTransport for MailGateway {
    async fn fetch_messages(&self, filter: &FetchFilter) -> Result<Vec<Message>> {
        self.imap.fetch(filter).await
    }

    async fn save_draft(&self, draft: &DraftEmail) -> Result<String> {
        self.imap.append_draft(draft).await
    }

    async fn send(&self, draft: &DraftEmail) -> Result<SentReceipt> {
        self.smtp.send(draft).await
    }
}
