//! HTTP client for OpenAI-compatible chat-completion servers (Ollama, vLLM, OpenAI).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header;
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{InferenceError, Result};
use crate::types::{ChatRequest, ChatResponseRaw};

/// Seam between the extractor and whatever answers chat requests.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Content of the first choice returned for `request`.
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub base_url: String,
    /// Sent as a bearer token. Local Ollama accepts any value.
    pub api_key: String,
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1/".to_string(),
            api_key: "ollama".to_string(),
            timeout: None,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatClient {
    pub fn new(config: InferenceConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let http = builder.build().map_err(InferenceError::Client)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let url = self.completions_url();
        let span = info_span!("chat_completion", model = %request.model, url = %url);

        async {
            let start = Instant::now();
            let response = self
                .http
                .post(&url)
                .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
                .json(request)
                .send()
                .await
                .map_err(|e| {
                    warn!(error = %e, "chat request failed");
                    InferenceError::Request(e)
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                warn!(status = %status, body = %body, "chat endpoint returned an error status");
                return Err(InferenceError::HttpStatus {
                    status: status.as_u16(),
                    url,
                    body,
                });
            }

            let raw: ChatResponseRaw = response.json().await?;
            let content = raw
                .choices
                .into_iter()
                .next()
                .ok_or(InferenceError::EmptyResponse)?
                .message
                .content
                .unwrap_or_default();

            debug!(
                duration_ms = start.elapsed().as_millis() as u64,
                chars = content.len(),
                "chat completion received"
            );
            Ok(content)
        }
        .instrument(span)
        .await
    }
}
