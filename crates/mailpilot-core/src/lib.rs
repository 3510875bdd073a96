//! MailPilot Core Library
//!
//! LLM-driven email assistant: an IMAP/SMTP gateway, a per-session
//! semantic index, and a tool-calling agent loop hardened against
//! prompt injection in email content.

pub mod agent;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod llm;
pub mod mail;
pub mod models;
pub mod policy;
pub mod sanitize;
pub mod tools;

pub use config::{Config, Credentials};
pub use error::{Error, Result};
pub use models::*;

/// Application name for config paths
pub const APP_NAME: &str = "mailpilot";
