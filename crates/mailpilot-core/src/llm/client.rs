//! OpenAI-compatible chat completion client

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{Credentials, LlmConfig};
use crate::error::{Error, Result};

use super::types::{ChatRequest, ChatResponse};

/// Completion endpoint seam. The agent loop depends on this trait, not
/// on the concrete HTTP client.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Send a chat completion request and await the full response.
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse>;
}

/// HTTP client for an OpenAI-compatible /chat/completions endpoint
pub struct CompletionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CompletionClient {
    /// Create a new completion client with a fixed request timeout.
    pub fn new(config: &LlmConfig, credentials: &Credentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Completion(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: credentials.api_key.clone(),
        })
    }
}

#[async_trait]
impl ChatApi for CompletionClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        debug!(
            "Requesting completion: model={}, messages={}, tools={}",
            request.model,
            request.messages.len(),
            request.tools.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Completion(format!("Completion request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Completion(format!(
                "Completion service returned {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Completion(format!("Failed to parse completion response: {}", e)))?;

        if parsed.choices.is_empty() {
            return Err(Error::Completion("Response contained no choices".to_string()));
        }

        debug!("Received completion {} from {}", parsed.id, parsed.model);
        Ok(parsed)
    }
}
