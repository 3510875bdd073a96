//! Configuration management for MailPilot

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Mail transport settings
    #[serde(default)]
    pub mail: MailConfig,

    /// LLM endpoint settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Mail transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// IMAP host
    #[serde(default = "default_imap_host")]
    pub imap_host: String,

    /// IMAP port (implicit TLS)
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,

    /// SMTP host
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    /// Folder fetched by default
    #[serde(default = "default_folder")]
    pub default_folder: String,

    /// IMAP Drafts folder (provider-specific)
    #[serde(default = "default_drafts_folder")]
    pub drafts_folder: String,

    /// Default number of messages per fetch
    #[serde(default = "default_fetch_count")]
    pub fetch_count: usize,

    /// Network operation timeout in seconds
    #[serde(default = "default_mail_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_imap_host() -> String {
    "imap.gmail.com".to_string()
}

fn default_imap_port() -> u16 {
    993
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_folder() -> String {
    "INBOX".to_string()
}

fn default_drafts_folder() -> String {
    "[Gmail]/Drafts".to_string()
}

fn default_fetch_count() -> usize {
    10
}

fn default_mail_timeout_secs() -> u64 {
    30
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            imap_host: default_imap_host(),
            imap_port: default_imap_port(),
            smtp_host: default_smtp_host(),
            default_folder: default_folder(),
            drafts_folder: default_drafts_folder(),
            fetch_count: default_fetch_count(),
            timeout_secs: default_mail_timeout_secs(),
        }
    }
}

/// LLM endpoint settings (OpenAI-compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the completion/embedding service
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Chat completion model
    #[serde(default = "default_model")]
    pub model: String,

    /// Embedding model
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: f64,

    /// Request timeout in milliseconds
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_llm_timeout_ms() -> u64 {
    60_000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            temperature: 0.0,
            timeout_ms: default_llm_timeout_ms(),
        }
    }
}

/// Agent loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on tool-dispatch iterations per instruction
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Maximum results returned by search_emails
    #[serde(default = "default_search_k")]
    pub search_k: usize,
}

fn default_max_steps() -> usize {
    8
}

fn default_search_k() -> usize {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            search_k: default_search_k(),
        }
    }
}

impl Config {
    /// Default config file path (~/.config/mailpilot/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(crate::APP_NAME).join("config.toml"))
    }

    /// Load configuration from a TOML file, falling back to defaults
    /// when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configured values
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_steps == 0 {
            return Err(Error::Config("agent.max_steps must be at least 1".to_string()));
        }
        if self.mail.fetch_count == 0 {
            return Err(Error::Config("mail.fetch_count must be at least 1".to_string()));
        }
        if self.llm.base_url.is_empty() {
            return Err(Error::Config("llm.base_url must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Account and service credentials, supplied once by the CLI from the
/// environment and passed by reference into constructors. Never logged.
#[derive(Clone)]
pub struct Credentials {
    /// Account email address
    pub email: String,

    /// App-specific password (never the primary account password)
    pub app_password: String,

    /// API key for the completion/embedding service
    pub api_key: String,
}

impl Credentials {
    /// Build credentials from environment variables.
    ///
    /// Reads GMAIL_EMAIL, GMAIL_APP_PASSWORD and OPENAI_API_KEY.
    pub fn from_env() -> Result<Self> {
        let email = require_env("GMAIL_EMAIL")?;
        let app_password = require_env("GMAIL_APP_PASSWORD")?;
        let api_key = require_env("OPENAI_API_KEY")?;
        Ok(Self {
            email,
            app_password,
            api_key,
        })
    }
}

fn require_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(Error::Config(format!("{} is not set", name))),
    }
}

// Secrets must never leak through Debug formatting.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("app_password", &"<redacted>")
            .field("api_key", &"<redacted>")
            .finish()
    }
}
