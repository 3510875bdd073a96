//! Error types for MailPilot

use thiserror::Error;

/// Result type alias using MailPilot's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for MailPilot
#[derive(Error, Debug)]
pub enum Error {
    // Mail transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection failed to {host}: {reason}")]
    ConnectionFailed { host: String, reason: String },

    #[error("Authentication failed for {account}")]
    AuthFailed { account: String },

    #[error("Provider rejected send: {0}")]
    Quota(String),

    #[error("Invalid email address: {0}")]
    InvalidEmailFormat(String),

    // LLM-side errors
    #[error("Embedding service error: {0}")]
    Embedding(String),

    #[error("Completion service error: {0}")]
    Completion(String),

    // Tool errors
    #[error("Tool call rejected by schema: {0}")]
    Schema(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Blocked by policy: {0}")]
    PolicyRejection(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O and wire errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns true if the agent loop should feed this error back to the
    /// model as a corrective tool result instead of aborting.
    pub fn is_correctable(&self) -> bool {
        matches!(
            self,
            Error::Schema(_) | Error::PolicyRejection(_) | Error::ToolNotFound(_)
        )
    }

    /// Returns true if search should degrade to lexical matching
    /// rather than failing the instruction.
    pub fn degrades_search(&self) -> bool {
        matches!(self, Error::Embedding(_))
    }

    /// Returns true if this error means credentials are bad and the
    /// session cannot continue.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Error::AuthFailed { .. })
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::AuthFailed { .. } => 2,
            Error::Transport(_) | Error::ConnectionFailed { .. } => 3,
            Error::Quota(_) => 4,
            Error::Config(_) | Error::TomlParse(_) => 5,
            _ => 1,
        }
    }
}
