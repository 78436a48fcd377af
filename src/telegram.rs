//! Minimal Telegram Bot API client: long polling and plain-text replies.

use crate::bridge::OperatorNotifier;
use crate::constants::{TELEGRAM_API_BASE, TELEGRAM_POLL_TIMEOUT_SECS};
use crate::types::{ObservedError, OperatorId, RelayError, Result};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api: String,
}

/// The request URL embeds the bot token, so it is stripped before the error
/// can reach a log line.
fn network_error(e: reqwest::Error) -> ObservedError {
    RelayError::Network(e.without_url()).into()
}

impl TelegramClient {
    pub fn new(http: reqwest::Client, token: &str) -> Self {
        Self::with_base_url(http, TELEGRAM_API_BASE, token)
    }

    pub fn with_base_url(http: reqwest::Client, base_url: &str, token: &str) -> Self {
        Self {
            http,
            api: format!("{}/bot{}", base_url.trim_end_matches('/'), token),
        }
    }

    fn unwrap_response<T>(resp: ApiResponse<T>, method: &str) -> Result<T> {
        match (resp.ok, resp.result) {
            (true, Some(result)) => Ok(result),
            _ => {
                let status = resp
                    .error_code
                    .and_then(|c| axum::http::StatusCode::from_u16(c).ok())
                    .unwrap_or(axum::http::StatusCode::BAD_GATEWAY);
                Err(RelayError::Upstream(
                    status,
                    format!(
                        "{} failed: {}",
                        method,
                        resp.description.unwrap_or_else(|| "no description".into())
                    ),
                )
                .into())
            }
        }
    }

    /// Long-polls for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let resp: ApiResponse<Vec<Update>> = self
            .http
            .get(format!("{}/getUpdates", self.api))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", TELEGRAM_POLL_TIMEOUT_SECS.to_string()),
            ])
            .timeout(std::time::Duration::from_secs(TELEGRAM_POLL_TIMEOUT_SECS + 10))
            .send()
            .await
            .map_err(network_error)?
            .json()
            .await
            .map_err(network_error)?;
        Self::unwrap_response(resp, "getUpdates")
    }

    /// Drops updates queued while the process was down.
    pub async fn delete_webhook(&self) -> Result<()> {
        let resp: ApiResponse<bool> = self
            .http
            .post(format!("{}/deleteWebhook", self.api))
            .json(&json!({ "drop_pending_updates": true }))
            .send()
            .await
            .map_err(network_error)?
            .json()
            .await
            .map_err(network_error)?;
        Self::unwrap_response(resp, "deleteWebhook").map(|_| ())
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&[&[&str]]>,
    ) -> Result<()> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(rows) = keyboard {
            let rows: Vec<Vec<serde_json::Value>> = rows
                .iter()
                .map(|row| row.iter().map(|b| json!({ "text": b })).collect())
                .collect();
            body["reply_markup"] = json!({ "keyboard": rows, "resize_keyboard": true });
        }
        let resp: ApiResponse<serde_json::Value> = self
            .http
            .post(format!("{}/sendMessage", self.api))
            .json(&body)
            .send()
            .await
            .map_err(network_error)?
            .json()
            .await
            .map_err(network_error)?;
        Self::unwrap_response(resp, "sendMessage").map(|_| ())
    }
}

#[async_trait::async_trait]
impl OperatorNotifier for TelegramClient {
    async fn notify(&self, operator: OperatorId, text: &str) -> Result<()> {
        self.send_message(operator.0, text, None).await
    }
}
