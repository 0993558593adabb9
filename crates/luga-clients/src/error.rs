//! Errors from third-party API calls.

use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),

    /// Provider-side usage limit (HTTP 429 or explicit quota error).
    #[error("Provider quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Unauthorized. {0}")]
    Unauthorized(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Mail delivery failed: {0}")]
    Mail(String),
}

impl ClientError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_response(provider: &'static str, msg: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider,
            message: msg.into(),
        }
    }

    /// HTTP status a caller may want to surface, if the error maps to one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::QuotaExceeded(_) => Some(429),
            Self::NotFound(_) => Some(404),
            Self::Unauthorized(_) => Some(401),
            Self::InvalidRequest(_) => Some(400),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
