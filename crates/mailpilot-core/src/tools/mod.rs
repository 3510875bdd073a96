//! Tool registry: the closed set of actions the model may request
//!
//! Tool names form a closed enum; anything else the model asks for is
//! rejected before reaching the executor. Arguments are validated
//! against per-tool schemas with unknown fields denied.

mod executor;

use serde::{Deserialize, Serialize};
use serde_json::json;

pub use executor::ToolExecutor;

use crate::error::{Error, Result};
use crate::llm::ToolCallRequest;

/// Permission tier of a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Reads mailbox or index state; auto-approved
    Read,
    /// Creates or sends mail; requires human confirmation
    Write,
}

/// The closed set of tools exposed to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    FetchInbox,
    SearchEmails,
    Summarize,
    DraftEmail,
    SendEmail,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::FetchInbox => "fetch_inbox",
            ToolName::SearchEmails => "search_emails",
            ToolName::Summarize => "summarize",
            ToolName::DraftEmail => "draft_email",
            ToolName::SendEmail => "send_email",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "fetch_inbox" => Some(ToolName::FetchInbox),
            "search_emails" => Some(ToolName::SearchEmails),
            "summarize" => Some(ToolName::Summarize),
            "draft_email" => Some(ToolName::DraftEmail),
            "send_email" => Some(ToolName::SendEmail),
            _ => None,
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            ToolName::FetchInbox | ToolName::SearchEmails | ToolName::Summarize => Tier::Read,
            ToolName::DraftEmail | ToolName::SendEmail => Tier::Write,
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a tool call came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOrigin {
    /// Requested by the model during the agent loop
    Model,
    /// Issued directly by the operator (bypasses the model, not policy)
    Operator,
}

/// Validated arguments for fetch_inbox
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FetchInboxArgs {
    pub max_count: Option<usize>,
    /// Only messages on or after this date, YYYY-MM-DD
    pub since: Option<String>,
    #[serde(default)]
    pub unread_only: bool,
    pub from: Option<String>,
    pub folder: Option<String>,
}

/// Validated arguments for search_emails
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SearchEmailsArgs {
    pub query: String,
    pub k: Option<usize>,
}

/// Validated arguments for summarize
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SummarizeArgs {
    pub message_ids: Vec<String>,
}

/// Validated arguments for draft_email and send_email
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ComposeArgs {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<String>,
}

/// Parsed, schema-valid tool arguments
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArgs {
    FetchInbox(FetchInboxArgs),
    SearchEmails(SearchEmailsArgs),
    Summarize(SummarizeArgs),
    DraftEmail(ComposeArgs),
    SendEmail(ComposeArgs),
}

/// A validated tool call ready for policy evaluation
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the tool result
    pub id: String,
    pub name: ToolName,
    pub args: ToolArgs,
    pub origin: CallOrigin,
}

impl ToolCall {
    /// All argument text of this call, used by the policy guard to
    /// check for reproduced flagged spans.
    pub fn argument_text(&self) -> String {
        match &self.args {
            ToolArgs::FetchInbox(a) => {
                format!("{} {}", a.from.as_deref().unwrap_or(""), a.folder.as_deref().unwrap_or(""))
            }
            ToolArgs::SearchEmails(a) => a.query.clone(),
            ToolArgs::Summarize(a) => a.message_ids.join(" "),
            ToolArgs::DraftEmail(a) | ToolArgs::SendEmail(a) => {
                format!(
                    "{} {} {} {}",
                    a.to.join(" "),
                    a.subject,
                    a.body,
                    a.in_reply_to.as_deref().unwrap_or("")
                )
            }
        }
    }
}

/// Outcome of executing (or refusing) a tool call, fed back to the
/// model as a tool-result message.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub call_id: String,
    /// Tool name as requested; kept as text so results can be produced
    /// even for names outside the registry
    pub name: String,
    pub success: bool,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(call_id: &str, name: ToolName, payload: serde_json::Value) -> Self {
        Self {
            call_id: call_id.to_string(),
            name: name.as_str().to_string(),
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failed(call_id: &str, name: ToolName, error: impl Into<String>) -> Self {
        Self::unknown(call_id, name.as_str(), error)
    }

    /// Failure for a call whose name never parsed into the registry
    pub fn unknown(call_id: &str, name: &str, error: impl Into<String>) -> Self {
        Self {
            call_id: call_id.to_string(),
            name: name.to_string(),
            success: false,
            payload: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    /// Render for the model's transcript
    pub fn render(&self) -> String {
        match &self.error {
            Some(e) => format!("error: {}", e),
            None => self.payload.to_string(),
        }
    }
}

/// Parse and validate a model-requested tool call.
///
/// Unknown tool names map to [`Error::ToolNotFound`]; malformed or
/// unexpected arguments map to [`Error::Schema`]. Both are correctable
/// by the model on its next step.
pub fn parse_tool_call(request: &ToolCallRequest, origin: CallOrigin) -> Result<ToolCall> {
    let name = ToolName::parse(&request.function.name)
        .ok_or_else(|| Error::ToolNotFound(request.function.name.clone()))?;

    let raw = if request.function.arguments.trim().is_empty() {
        "{}"
    } else {
        request.function.arguments.as_str()
    };

    let args = match name {
        ToolName::FetchInbox => ToolArgs::FetchInbox(validate_fetch(parse_args(name, raw)?)?),
        ToolName::SearchEmails => ToolArgs::SearchEmails(parse_args(name, raw)?),
        ToolName::Summarize => ToolArgs::Summarize(parse_args(name, raw)?),
        ToolName::DraftEmail => ToolArgs::DraftEmail(validate_compose(parse_args(name, raw)?)?),
        ToolName::SendEmail => ToolArgs::SendEmail(validate_compose(parse_args(name, raw)?)?),
    };

    Ok(ToolCall {
        id: request.id.clone(),
        name,
        args,
        origin,
    })
}

fn parse_args<T: serde::de::DeserializeOwned>(name: ToolName, raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Schema(format!("Invalid arguments for {}: {}", name, e)))
}

fn validate_fetch(args: FetchInboxArgs) -> Result<FetchInboxArgs> {
    if let Some(since) = &args.since {
        parse_since_date(since)?;
    }
    Ok(args)
}

/// Parse a YYYY-MM-DD date from tool arguments
pub(crate) fn parse_since_date(s: &str) -> Result<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| Error::Schema(format!("'since' must be YYYY-MM-DD, got {:?}", s)))
}

fn validate_compose(args: ComposeArgs) -> Result<ComposeArgs> {
    if args.to.is_empty() {
        return Err(Error::Schema("'to' must list at least one recipient".to_string()));
    }
    for addr in &args.to {
        if !addr.contains('@') || addr.trim() != addr || addr.contains(char::is_whitespace) {
            return Err(Error::Schema(format!("Invalid recipient address: {}", addr)));
        }
    }
    if args.subject.trim().is_empty() {
        return Err(Error::Schema("'subject' must not be empty".to_string()));
    }
    Ok(args)
}

/// OpenAI-format tool definitions advertised to the model
pub fn definitions() -> Vec<serde_json::Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": "fetch_inbox",
                "description": "Fetch recent emails from the mailbox, newest first, and index them for search.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "max_count": {
                            "type": "integer",
                            "description": "Maximum number of emails to fetch"
                        },
                        "since": {
                            "type": "string",
                            "description": "Only emails on or after this date (YYYY-MM-DD)"
                        },
                        "unread_only": {
                            "type": "boolean",
                            "description": "Only fetch unread emails"
                        },
                        "from": {
                            "type": "string",
                            "description": "Only fetch emails from this sender address"
                        },
                        "folder": {
                            "type": "string",
                            "description": "Mailbox folder to fetch from (default INBOX)"
                        }
                    }
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "search_emails",
                "description": "Semantic search over the emails fetched in this session.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Natural language search query"
                        },
                        "k": {
                            "type": "integer",
                            "description": "Maximum number of results"
                        }
                    },
                    "required": ["query"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "summarize",
                "description": "Retrieve the full content of fetched emails by id so you can summarize them.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "message_ids": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Ids of emails to retrieve, from fetch_inbox or search_emails results"
                        }
                    },
                    "required": ["message_ids"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "draft_email",
                "description": "Save an email draft to the drafts folder. Does not send anything.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "to": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Recipient email addresses"
                        },
                        "subject": {"type": "string"},
                        "body": {"type": "string"},
                        "in_reply_to": {
                            "type": "string",
                            "description": "Message-ID being replied to"
                        }
                    },
                    "required": ["to", "subject", "body"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "send_email",
                "description": "Send an email. Requires explicit human confirmation before anything leaves the account.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "to": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Recipient email addresses"
                        },
                        "subject": {"type": "string"},
                        "body": {"type": "string"},
                        "in_reply_to": {
                            "type": "string",
                            "description": "Message-ID being replied to"
                        }
                    },
                    "required": ["to", "subject", "body"]
                }
            }
        }),
    ]
}
