use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct OperatorId(pub i64);

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OperatorId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperatorRole {
    Owner,
    Admin,
}

impl OperatorRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for OperatorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => write!(f, "owner"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// A roster entry from the `admins` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Admin {
    pub operator_id: OperatorId,
    pub username: Option<String>,
    pub role: OperatorRole,
}

/// The single operator driving this process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionIdentity {
    pub operator_id: OperatorId,
    pub role: OperatorRole,
}

/// One message observed in the live chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub display_name: String,
    pub text: String,
}

impl ChatEvent {
    pub fn new(display_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            text: text.into(),
        }
    }

    /// `displayName: text`, the shape used for both the prompt window and relays.
    pub fn formatted(&self) -> String {
        format!("{}: {}", self.display_name, self.text)
    }
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("No credentials configured")]
    NoCredentials,

    #[error("Credential pool exhausted")]
    PoolExhausted,

    #[error("No working credential found")]
    NoWorkingCredential,

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Upstream error (status {0}): {1}")]
    Upstream(axum::http::StatusCode, String),

    #[error("Completion returned no text")]
    EmptyCompletion,

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String, SpanTrace),
}

impl RelayError {
    /// Failures that point at the credential itself and are cured by rotation.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Unauthorized(_))
    }

    /// Maps an upstream status and message onto the rotation taxonomy.
    pub fn from_status(status: axum::http::StatusCode, message: String) -> Self {
        match status.as_u16() {
            429 => Self::RateLimited(message),
            401 => Self::Unauthorized(message),
            _ => Self::Upstream(status, message),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into(), SpanTrace::capture())
    }
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: RelayError,
    pub span_trace: SpanTrace,
}

impl std::fmt::Display for ObservedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<RelayError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;
