//! Shared HTTP plumbing for provider clients.

use std::time::Duration;

use metrics::counter;
use reqwest::{Client, Response};
use tracing::warn;

use crate::error::{ClientError, ClientResult};

/// Provider call outcomes, by provider and outcome.
pub const PROVIDER_CALLS_TOTAL: &str = "luga_provider_calls_total";

pub fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

pub fn record_call(provider: &'static str, outcome: &'static str) {
    counter!(PROVIDER_CALLS_TOTAL, "provider" => provider, "outcome" => outcome).increment(1);
}

/// Pass successful responses through; map failures to `ClientError`.
pub async fn check_status(provider: &'static str, response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        record_call(provider, "ok");
        return Ok(response);
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    warn!(provider, status = status.as_u16(), "Provider returned an error");
    record_call(provider, "error");

    Err(match status.as_u16() {
        429 => ClientError::QuotaExceeded(message),
        401 | 403 => ClientError::Unauthorized(message),
        400 | 422 => ClientError::InvalidRequest(message),
        404 => ClientError::NotFound(message),
        code => ClientError::Api {
            provider,
            status: code,
            message,
        },
    })
}

/// Env var that must be present and non-empty.
pub fn required_env(name: &str) -> ClientResult<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ClientError::config(format!("{} not set", name)))
}

pub fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
