//! AI completion collaborator: one request, one classified outcome.
//!
//! A [`CompletionProvider`] mints [`CompletionClient`]s bound to a single
//! credential. The failover controller owns at most one live client and asks
//! the provider for a fresh one whenever the active credential changes.

use crate::constants::OPENROUTER_BASE_URL;
use crate::str_utils::mask_credential;
use crate::types::{RelayError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(system_prompt: &str, user_prompt: &str, max_tokens: u32) -> Self {
        Self {
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
            max_tokens,
        }
    }
}

/// A completion handle bound to exactly one credential.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn credential(&self) -> &str;

    /// Returns the reply text, possibly empty. Errors are classified into
    /// `RateLimited`, `Unauthorized`, or anything else.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

pub trait CompletionProvider: Send + Sync {
    fn bind(&self, credential: &str) -> Arc<dyn CompletionClient>;
}

/// --- OPENROUTER WIRE TYPES ---

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    error: ProviderErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetails {
    #[serde(default)]
    message: String,
    code: Option<u16>,
}

/// Interprets an OpenRouter response. The provider sometimes reports errors
/// inside a 200 body, so the `error.code` field wins over the HTTP status.
pub fn parse_completion_body(status: axum::http::StatusCode, body: &str) -> Result<String> {
    if let Ok(err) = serde_json::from_str::<ProviderError>(body) {
        let code = err
            .error
            .code
            .and_then(|c| axum::http::StatusCode::from_u16(c).ok())
            .unwrap_or(if status.is_success() {
                axum::http::StatusCode::BAD_GATEWAY
            } else {
                status
            });
        return Err(RelayError::from_status(code, err.error.message).into());
    }

    if !status.is_success() {
        return Err(RelayError::from_status(status, body.to_string()).into());
    }

    let parsed: ChatResponse = serde_json::from_str(body)?;
    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .unwrap_or_default();
    Ok(text)
}

pub struct OpenRouterProvider {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OpenRouterProvider {
    pub fn new(http: reqwest::Client, base_url: Option<String>, model: String) -> Self {
        Self {
            http,
            base_url: base_url.unwrap_or_else(|| OPENROUTER_BASE_URL.to_string()),
            model,
        }
    }
}

impl CompletionProvider for OpenRouterProvider {
    fn bind(&self, credential: &str) -> Arc<dyn CompletionClient> {
        Arc::new(OpenRouterClient {
            http: self.http.clone(),
            endpoint: format!("{}/chat/completions", self.base_url.trim_end_matches('/')),
            model: self.model.clone(),
            credential: credential.to_string(),
        })
    }
}

pub struct OpenRouterClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    credential: String,
}

#[async_trait]
impl CompletionClient for OpenRouterClient {
    fn credential(&self) -> &str {
        &self.credential
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            max_tokens: request.max_tokens,
        };

        tracing::trace!(
            "[🧠] completion via {} ({} max tokens)",
            mask_credential(&self.credential),
            request.max_tokens
        );

        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.credential))
            .json(&body)
            .send()
            .await
            .map_err(RelayError::Network)?;

        let status = response.status();
        let text = match response.text().await {
            Ok(t) => t,
            Err(_) => "Unknown error (failed to read response text)".to_string(),
        };

        let status = axum::http::StatusCode::from_u16(status.as_u16())
            .unwrap_or(axum::http::StatusCode::BAD_GATEWAY);
        parse_completion_body(status, &text)
    }
}
