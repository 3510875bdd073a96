//! LLM completion interface
//!
//! OpenAI-compatible chat completion wire types and a blocking-style
//! (awaited, time-bounded) client. The agent loop talks to the model
//! only through the [`ChatApi`] trait so tests can substitute fakes.

mod client;
mod types;

pub use client::{ChatApi, CompletionClient};
pub use types::{ChatMessage, ChatRequest, ChatResponse, Choice, FunctionCall, ToolCallRequest, Usage};
