//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use luga_clients::ClientError;
use luga_models::{InputError, QuotaShortfall};

pub type ApiResult<T> = Result<T, ApiError>;

/// Message shown whenever a plan balance blocks a request.
pub const QUOTA_EXCEEDED_MESSAGE: &str = "Insufficient quota, please upgrade your plan";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    /// Plan balance exhausted. 403 with code `quota_exceeded`.
    #[error("{0}")]
    QuotaExceeded(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("{0}")]
    BadGateway(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Storage(#[from] luga_storage::StorageError),

    #[error("Firestore error: {0}")]
    Firestore(#[from] luga_firestore::FirestoreError),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self::Unprocessable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn quota_exceeded() -> Self {
        Self::QuotaExceeded(QUOTA_EXCEEDED_MESSAGE.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) | ApiError::QuotaExceeded(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Storage(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) | ApiError::Storage(_) | ApiError::Firestore(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> Option<&'static str> {
        match self {
            ApiError::QuotaExceeded(_) => Some("quota_exceeded"),
            _ => None,
        }
    }
}

impl From<InputError> for ApiError {
    fn from(e: InputError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<QuotaShortfall> for ApiError {
    fn from(_: QuotaShortfall) -> Self {
        Self::quota_exceeded()
    }
}

impl From<ClientError> for ApiError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::QuotaExceeded(_) => Self::quota_exceeded(),
            ClientError::NotFound(msg) => Self::NotFound(msg),
            ClientError::InvalidRequest(msg) => Self::BadRequest(msg),
            ClientError::InvalidToken(msg) => Self::Unauthorized(msg),
            ClientError::InvalidSignature(msg) => Self::BadRequest(format!("Invalid signature: {}", msg)),
            ClientError::Config(msg) => Self::Internal(msg),
            other => Self::BadGateway(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
            if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
                "An internal error occurred".to_string()
            } else {
                self.to_string()
            }
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            detail,
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luga_models::QuotaKind;

    #[test]
    fn test_quota_shortfall_maps_to_403() {
        let err: ApiError = QuotaShortfall::Exhausted { kind: QuotaKind::Text }.into();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), Some("quota_exceeded"));
        assert_eq!(err.to_string(), QUOTA_EXCEEDED_MESSAGE);
    }

    #[test]
    fn test_provider_errors() {
        let err: ApiError = ClientError::QuotaExceeded("429".into()).into();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let err: ApiError = ClientError::NotFound("Job with id x not found".into()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: ApiError = ClientError::Api {
            provider: "sync",
            status: 500,
            message: "boom".into(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_invalid_upload_is_client_error() {
        let err: ApiError = luga_storage::StorageError::InvalidUpload("File type not allowed".into()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
