//! HTTP client for the language-model backend.
//!
//! Supports Anthropic's messages API and OpenAI-compatible chat completion
//! APIs (OpenAI, DeepSeek, local servers); the format is picked from the URL.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Credential;
use crate::error::BackendError;

/// Anything that can turn a system prompt plus a user message into text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, BackendError>;
}

/// API format type
#[derive(Debug, Clone, PartialEq)]
pub enum ApiFormat {
    Anthropic,
    OpenAI,
}

pub struct LlmClient {
    client: Client,
    credential: Credential,
    api_url: String,
    model: String,
    api_format: ApiFormat,
}

impl LlmClient {
    pub fn new(
        credential: Credential,
        api_url: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let api_format = Self::detect_api_format(&api_url);
        Ok(Self {
            client,
            credential,
            api_url,
            model,
            api_format,
        })
    }

    fn detect_api_format(url: &str) -> ApiFormat {
        if url.contains("anthropic.com") || url.trim_end_matches('/').ends_with("/v1/messages") {
            ApiFormat::Anthropic
        } else {
            ApiFormat::OpenAI
        }
    }

    async fn complete_anthropic(&self, system: &str, user: &str) -> Result<String, BackendError> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: 256,
            system: system.into(),
            messages: vec![Message {
                role: "user".into(),
                content: user.into(),
            }],
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(map_transport)?;

        let response = check_status(response).await?;
        let completion: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        completion
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| BackendError::Malformed("response has no text content".into()))
    }

    async fn complete_openai(&self, system: &str, user: &str) -> Result<String, BackendError> {
        let request = OpenAIRequest {
            model: self.model.clone(),
            max_tokens: 256,
            temperature: 0.0,
            messages: vec![
                Message {
                    role: "system".into(),
                    content: system.into(),
                },
                Message {
                    role: "user".into(),
                    content: user.into(),
                },
            ],
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(self.credential.expose())
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(map_transport)?;

        let response = check_status(response).await?;
        let completion: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| BackendError::Malformed("response has no choices".into()))
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, BackendError> {
        debug!(model = %self.model, format = ?self.api_format, "sending completion request");
        match self.api_format {
            ApiFormat::Anthropic => self.complete_anthropic(system, user).await,
            ApiFormat::OpenAI => self.complete_openai(system, user).await,
        }
    }
}

fn map_transport(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Transport(err.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, body))
}

fn classify_status(status: StatusCode, body: String) -> BackendError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Auth(body),
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => BackendError::Timeout,
        other => BackendError::Status {
            status: other.as_u16(),
            body,
        },
    }
}

// Anthropic API format
#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

// OpenAI-compatible API format
#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}
