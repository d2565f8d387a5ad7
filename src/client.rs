//! HTTP client for OpenAI-compatible streaming chat completions.

use anyhow::{Context, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::logging;
use crate::sse::{EVENT_STREAM_MIME, StreamResponse};

/// One message in a chat-completions request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// Posts streaming chat-completions requests. Each call makes a single
/// attempt; retrying is left to the caller.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
}

// === ChatClient ===

impl ChatClient {
    /// Create a client from CLI configuration.
    pub fn new(config: &Config) -> Result<Self> {
        Self::from_parts(&config.base_url(), config.api_key(), config.model())
    }

    pub fn from_parts(base_url: &str, api_key: Option<&str>, model: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static(EVENT_STREAM_MIME));
        if let Some(key) = api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .context("API key contains characters not allowed in a header")?,
            );
        } else {
            logging::warn("No API key configured; sending unauthenticated requests");
        }

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        let base_url = base_url.trim_end_matches('/').to_string();
        logging::info(format!("Chat endpoint: {base_url}, model: {model}"));

        Ok(Self {
            http_client,
            base_url,
            model: model.to_string(),
        })
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// Send `messages` and return the streaming response.
    ///
    /// Fails on transport errors, non-success statuses and when `cancel`
    /// fires before the response headers arrive.
    pub async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<StreamResponse> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };
        let url = self.completions_url();
        tracing::debug!(url = %url, messages = messages.len(), "Sending chat request");

        let send = self.http_client.post(&url).json(&request).send();
        let response = tokio::select! {
            () = cancel.cancelled() => anyhow::bail!("Request cancelled before a response arrived"),
            result = send => result.with_context(|| format!("Request to {url} failed"))?,
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat request failed: HTTP {status}: {error_text}");
        }
        Ok(StreamResponse::from(response))
    }

    /// Convenience wrapper for a single user prompt.
    pub async fn stream_prompt(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<StreamResponse> {
        self.stream_chat(&[ChatMessage::user(prompt)], cancel).await
    }
}
