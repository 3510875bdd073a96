//! IMAP mailbox access with app-password authentication
//!
//! The connection is opened lazily on first use and reused across
//! operations within the session. A failed operation logs the session
//! out and, for transient transport errors, retries exactly once on a
//! fresh connection.

use async_imap::types::{Fetch, Flag};
use async_imap::Client as ImapClientAsync;
use async_native_tls::TlsConnector;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, info, warn};

use crate::config::{Credentials, MailConfig};
use crate::error::{Error, Result};
use crate::models::{Address, DraftEmail, Message};
use crate::sanitize;

use super::{generate_message_id, FetchFilter};

/// Type alias for the IMAP session with our TLS stream
type ImapSession =
    async_imap::Session<async_native_tls::TlsStream<tokio_util::compat::Compat<TcpStream>>>;

/// Flag string for APPENDed drafts
const DRAFT_FLAGS: &str = "(\\Draft)";

/// IMAP client for a single account
pub struct ImapMailbox {
    host: String,
    port: u16,
    email: String,
    app_password: String,
    default_folder: String,
    drafts_folder: String,
    default_fetch_count: usize,
    timeout_secs: u64,
    /// Opened lazily, reused until an operation fails
    session: Mutex<Option<ImapSession>>,
}

impl ImapMailbox {
    pub fn new(config: &MailConfig, credentials: &Credentials) -> Self {
        Self {
            host: config.imap_host.clone(),
            port: config.imap_port,
            email: credentials.email.clone(),
            app_password: credentials.app_password.clone(),
            default_folder: config.default_folder.clone(),
            drafts_folder: config.drafts_folder.clone(),
            default_fetch_count: config.fetch_count,
            timeout_secs: config.timeout_secs,
            session: Mutex::new(None),
        }
    }

    /// Connect, perform TLS and LOGIN
    async fn connect(&self) -> Result<ImapSession> {
        debug!("Connecting to IMAP at {}:{}", self.host, self.port);

        let timeout = std::time::Duration::from_secs(self.timeout_secs);
        let tcp = tokio::time::timeout(timeout, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| Error::ConnectionFailed {
                host: self.host.clone(),
                reason: "TCP connect timed out".to_string(),
            })?
            .map_err(|e| Error::ConnectionFailed {
                host: self.host.clone(),
                reason: e.to_string(),
            })?;

        // Wrap TCP stream with compat layer for futures AsyncRead/Write
        let tcp_compat = tcp.compat();

        let tls = TlsConnector::new();
        let tls_stream = tls.connect(&self.host, tcp_compat).await.map_err(|e| {
            Error::ConnectionFailed {
                host: self.host.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut client = ImapClientAsync::new(tls_stream);

        // The server sends a greeting before accepting commands; it must
        // be consumed before LOGIN (see async-imap #84).
        match client.read_response().await {
            Some(Ok(_greeting)) => {}
            Some(Err(e)) => {
                return Err(Error::Transport(format!("Failed to read greeting: {:?}", e)));
            }
            None => {
                return Err(Error::Transport(
                    "Unexpected end of stream, expected greeting".to_string(),
                ));
            }
        }

        let login_future = client.login(&self.email, &self.app_password);
        let session = tokio::time::timeout(timeout, login_future)
            .await
            .map_err(|_| Error::Transport("LOGIN timed out".to_string()))?
            .map_err(|_| Error::AuthFailed {
                account: self.email.clone(),
            })?;

        debug!("IMAP login succeeded for {}", self.email);
        Ok(session)
    }

    /// Connect if no live session is cached
    async fn ensure_session(&self, slot: &mut Option<ImapSession>) -> Result<()> {
        if slot.is_none() {
            *slot = Some(self.connect().await?);
        }
        Ok(())
    }

    /// Log the cached session out and drop it
    async fn discard_session(&self, slot: &mut Option<ImapSession>) {
        if let Some(mut session) = slot.take() {
            session.logout().await.ok();
        }
    }

    /// Fetch messages matching `filter`, newest first
    pub async fn fetch(&self, filter: &FetchFilter) -> Result<Vec<Message>> {
        let folder = filter
            .folder
            .clone()
            .unwrap_or_else(|| self.default_folder.clone());
        let limit = filter.max_count.unwrap_or(self.default_fetch_count).max(1);
        let query = search_query(filter);

        let mut slot = self.session.lock().await;
        let fetches = match self.fetch_raw(&mut slot, &folder, &query, limit).await {
            Ok(fetches) => fetches,
            Err(e) => {
                self.discard_session(&mut slot).await;
                if !is_transient(&e) {
                    return Err(e);
                }
                warn!("Fetch failed, retrying once on a fresh connection: {}", e);
                match self.fetch_raw(&mut slot, &folder, &query, limit).await {
                    Ok(fetches) => fetches,
                    Err(e) => {
                        self.discard_session(&mut slot).await;
                        return Err(e);
                    }
                }
            }
        };
        drop(slot);

        let mut parsed = Vec::new();
        for fetch in fetches {
            let uid = match fetch.uid {
                Some(uid) => uid,
                None => continue,
            };
            let body = match fetch.body() {
                Some(b) => b,
                None => continue,
            };
            let unread = !fetch.flags().any(|f| matches!(f, Flag::Seen));
            match parse_raw_message(uid, body, &folder, unread) {
                Ok(message) => parsed.push(message),
                Err(e) => {
                    debug!("Skipping unparseable message UID {}: {}", uid, e);
                }
            }
        }

        // UID order approximates arrival; sort by date for correctness.
        parsed.sort_by(|a, b| b.date.cmp(&a.date));

        info!("Fetched {} messages from {}", parsed.len(), folder);
        Ok(parsed)
    }

    /// One select/search/fetch round on the cached session
    async fn fetch_raw(
        &self,
        slot: &mut Option<ImapSession>,
        folder: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Fetch>> {
        self.ensure_session(slot).await?;
        let session = slot
            .as_mut()
            .ok_or_else(|| Error::Transport("IMAP session unavailable".to_string()))?;

        session
            .select(folder)
            .await
            .map_err(|e| Error::Transport(format!("Failed to select {}: {:?}", folder, e)))?;

        let uids = session
            .uid_search(query)
            .await
            .map_err(|e| Error::Transport(format!("Search failed: {:?}", e)))?;

        // Higher UID means newer; sort descending and take the newest.
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_by(|a, b| b.cmp(a));
        uids.truncate(limit);
        debug!("Search '{}' in {} matched {} messages", query, folder, uids.len());

        if uids.is_empty() {
            return Ok(vec![]);
        }

        let uid_range = uids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let results: Vec<_> = {
            let stream = session
                .uid_fetch(&uid_range, "(UID FLAGS BODY.PEEK[])")
                .await
                .map_err(|e| Error::Transport(format!("Fetch failed: {:?}", e)))?;
            stream.collect().await
        };

        let mut fetches = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(fetch) => fetches.push(fetch),
                Err(e) => warn!("Error in fetch stream: {:?}", e),
            }
        }
        Ok(fetches)
    }

    /// Store a draft in the drafts folder via APPEND
    pub async fn append_draft(&self, draft: &DraftEmail) -> Result<String> {
        let message_id = generate_message_id(&self.email);
        let content = render_rfc822(draft, &self.email, &message_id, Utc::now());

        let mut slot = self.session.lock().await;
        if let Err(e) = self.append_raw(&mut slot, content.as_bytes()).await {
            self.discard_session(&mut slot).await;
            if !is_transient(&e) {
                return Err(e);
            }
            warn!("Draft append failed, retrying once on a fresh connection: {}", e);
            if let Err(e) = self.append_raw(&mut slot, content.as_bytes()).await {
                self.discard_session(&mut slot).await;
                return Err(e);
            }
        }

        info!("Saved draft {} to {}", message_id, self.drafts_folder);
        Ok(message_id)
    }

    async fn append_raw(&self, slot: &mut Option<ImapSession>, content: &[u8]) -> Result<()> {
        self.ensure_session(slot).await?;
        let session = slot
            .as_mut()
            .ok_or_else(|| Error::Transport("IMAP session unavailable".to_string()))?;

        session
            .append(&self.drafts_folder, Some(DRAFT_FLAGS), None, content)
            .await
            .map_err(|e| {
                Error::Transport(format!(
                    "Failed to append draft to {}: {:?}",
                    self.drafts_folder, e
                ))
            })
    }
}

/// Whether a failed operation is worth one retry on a fresh
/// connection. Auth and format errors would fail the same way again.
fn is_transient(e: &Error) -> bool {
    matches!(e, Error::Transport(_))
}

/// Build the IMAP SEARCH query for a fetch filter
fn search_query(filter: &FetchFilter) -> String {
    let mut terms = Vec::new();
    if filter.unread_only {
        terms.push("UNSEEN".to_string());
    }
    if let Some(since) = &filter.since {
        terms.push(format!("SINCE {}", since.format("%d-%b-%Y")));
    }
    if let Some(from) = &filter.from {
        terms.push(format!("FROM \"{}\"", from.replace('"', "")));
    }
    if terms.is_empty() {
        "ALL".to_string()
    } else {
        terms.join(" ")
    }
}

/// Parse raw RFC822 bytes into a sanitized Message
fn parse_raw_message(uid: u32, raw: &[u8], folder: &str, unread: bool) -> Result<Message> {
    let parsed = mail_parser::MessageParser::default()
        .parse(raw)
        .ok_or_else(|| Error::InvalidEmailFormat("Failed to parse email".to_string()))?;

    let message_id = parsed
        .message_id()
        .map(|s| format!("<{}>", s))
        .unwrap_or_else(|| format!("<{}@unknown>", uid));

    // Thread root: first References entry, else In-Reply-To, else self.
    let thread_id = parsed
        .references()
        .as_text_list()
        .and_then(|list| list.first().map(|s| format!("<{}>", s)))
        .or_else(|| parsed.in_reply_to().as_text().map(|s| format!("<{}>", s)))
        .unwrap_or_else(|| message_id.clone());

    let from = parsed
        .from()
        .and_then(|addrs| addrs.first())
        .map(|addr| Address {
            name: addr.name().map(|s| s.to_string()),
            email: addr.address().map(|s| s.to_string()).unwrap_or_default(),
        })
        .unwrap_or_else(|| Address::new("unknown@unknown.invalid"));

    let to: Vec<Address> = parsed
        .to()
        .map(|addrs| {
            addrs
                .iter()
                .map(|addr| Address {
                    name: addr.name().map(|s| s.to_string()),
                    email: addr.address().map(|s| s.to_string()).unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    let subject = parsed.subject().unwrap_or("(No Subject)").to_string();

    let date = parsed
        .date()
        .map(|d| DateTime::from_timestamp(d.to_timestamp(), 0).unwrap_or_else(Utc::now))
        .unwrap_or_else(Utc::now);

    // Prefer the plain text part; fall back to converted HTML.
    let raw_body = match parsed.body_text(0) {
        Some(text) if !text.trim().is_empty() => text.to_string(),
        _ => parsed
            .body_html(0)
            .map(|html| html2text::from_read(html.as_bytes(), 80).unwrap_or_default())
            .unwrap_or_default(),
    };

    Ok(Message {
        id: uid.to_string(),
        thread_id,
        from,
        to,
        subject,
        body: sanitize::sanitize(&raw_body),
        date,
        folder: folder.to_string(),
        unread,
    })
}

/// Render a draft as an RFC822 message for APPEND
fn render_rfc822(
    draft: &DraftEmail,
    from: &str,
    message_id: &str,
    date: DateTime<Utc>,
) -> String {
    let mut headers = vec![
        format!("From: {}", from),
        format!("To: {}", draft.to.join(", ")),
        format!("Subject: {}", draft.subject.replace(['\r', '\n'], " ")),
        format!("Date: {}", date.to_rfc2822()),
        format!("Message-ID: {}", message_id),
    ];
    if let Some(parent) = &draft.in_reply_to {
        headers.push(format!("In-Reply-To: {}", parent));
        headers.push(format!("References: {}", parent));
    }
    headers.push("MIME-Version: 1.0".to_string());
    headers.push("Content-Type: text/plain; charset=utf-8".to_string());

    format!("{}\r\n\r\n{}", headers.join("\r\n"), draft.body)
}
