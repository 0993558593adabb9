//! Sync.so lip-sync generation API.

use std::time::Duration;

use hmac::{Hmac, Mac};
use luga_models::{JobSnapshot, LipSyncStatus};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::http::{check_status, http_client, optional_env, record_call, required_env};

const PROVIDER: &str = "sync";
const DEFAULT_API_URL: &str = "https://api.sync.so/v2";
/// Header carrying the shared webhook secret.
pub const WEBHOOK_SECRET_HEADER: &str = "x-sync-webhook-secret";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub webhook_secret: Option<SecretString>,
}

impl SyncConfig {
    pub fn from_env() -> ClientResult<Self> {
        Ok(Self {
            api_key: SecretString::from(required_env("SYNC_API_KEY")?),
            base_url: optional_env("SYNC_BASE_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            webhook_secret: optional_env("SYNC_WEBHOOK_SECRET").map(SecretString::from),
        })
    }
}

/// A lip-sync submission.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub video_url: String,
    pub audio_url: String,
    pub model: String,
    pub output_format: String,
    pub webhook_url: Option<String>,
}

#[derive(Serialize)]
struct InputItem<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    url: &'a str,
}

#[derive(Serialize)]
struct GenerateOptions<'a> {
    output_format: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody<'a> {
    model: &'a str,
    input: [InputItem<'a>; 2],
    options: GenerateOptions<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_url: Option<&'a str>,
}

#[derive(Clone)]
pub struct SyncClient {
    http: Client,
    config: SyncConfig,
}

impl SyncClient {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            http: http_client(Duration::from_secs(60)),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Submit a job. The returned snapshot carries the provider's job id.
    pub async fn generate(&self, request: &GenerateRequest) -> ClientResult<JobSnapshot> {
        let body = GenerateBody {
            model: &request.model,
            input: [
                InputItem {
                    kind: "video",
                    url: &request.video_url,
                },
                InputItem {
                    kind: "audio",
                    url: &request.audio_url,
                },
            ],
            options: GenerateOptions {
                output_format: &request.output_format,
            },
            webhook_url: request.webhook_url.as_deref(),
        };

        debug!(model = %request.model, "Submitting lip-sync job");
        let response = self
            .http
            .post(self.url("generate"))
            .header("x-api-key", self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let response = check_status(PROVIDER, response).await?;

        let snapshot = snapshot_from_json(response.json().await?)?;
        info!(job_id = %snapshot.id, status = %snapshot.status.as_str(), "Lip-sync job submitted");
        Ok(snapshot)
    }

    pub async fn get_job(&self, job_id: &str) -> ClientResult<JobSnapshot> {
        let response = self
            .http
            .get(self.url(&format!("generate/{}", job_id)))
            .header("x-api-key", self.config.api_key.expose_secret())
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                record_call(PROVIDER, "error");
                Err(ClientError::NotFound(format!("Job with id {} not found", job_id)))
            }
            StatusCode::UNAUTHORIZED => {
                record_call(PROVIDER, "error");
                Err(ClientError::Unauthorized("Check your API key".to_string()))
            }
            _ => {
                let response = check_status(PROVIDER, response).await?;
                snapshot_from_json(response.json().await?)
            }
        }
    }

    /// Check the shared secret on an incoming webhook. Accepts everything when
    /// no secret is configured.
    pub fn verify_webhook(&self, provided: Option<&str>) -> ClientResult<()> {
        let Some(expected) = &self.config.webhook_secret else {
            return Ok(());
        };
        match provided {
            Some(value) if secret_matches(value, expected.expose_secret()) => Ok(()),
            _ => {
                warn!("Rejected lip-sync webhook with bad secret");
                Err(ClientError::InvalidSignature("webhook secret mismatch".to_string()))
            }
        }
    }
}

/// Compare MACs of both values so the check runs in constant time.
fn secret_matches(provided: &str, expected: &str) -> bool {
    let Ok(mac) = Hmac::<Sha256>::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    let mut reference = mac.clone();
    reference.update(expected.as_bytes());
    let tag = reference.finalize().into_bytes();

    let mut candidate = mac;
    candidate.update(provided.as_bytes());
    candidate.verify_slice(&tag).is_ok()
}

/// Parse a job body from either `GET /generate/{id}` or a webhook.
pub fn snapshot_from_json(raw: Value) -> ClientResult<JobSnapshot> {
    // Webhooks wrap the job in `result`.
    let job = match raw.get("result") {
        Some(inner) if inner.get("id").is_some() => inner,
        _ => &raw,
    };

    let id = job
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::invalid_response(PROVIDER, "missing job id"))?
        .to_string();
    let status = job
        .get("status")
        .and_then(Value::as_str)
        .map(LipSyncStatus::from_remote)
        .unwrap_or(LipSyncStatus::Pending);

    let output_url = [
        job.get("outputUrl"),
        job.pointer("/output/url"),
        job.pointer("/result/url"),
    ]
    .into_iter()
    .flatten()
    .find_map(Value::as_str)
    .map(str::to_string);

    let output_duration = job.get("outputDuration").and_then(Value::as_f64);
    let error = job
        .get("error")
        .and_then(|e| e.as_str().map(str::to_string).or_else(|| e.get("message").and_then(Value::as_str).map(str::to_string)));

    Ok(JobSnapshot {
        id,
        status,
        output_url,
        output_duration,
        error,
        raw: job.clone(),
    })
}
