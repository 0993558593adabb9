//! Cloudinary upload API.
//!
//! Audio and video both use Cloudinary's `video` resource type. Requests are
//! signed with SHA-256 over the sorted parameters followed by the API secret,
//! which requires SHA-256 signing to be enabled on the account.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use luga_models::utils::file_stem;
use luga_models::{MediaKind, StorageProvider, StoredObject};
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

const DEFAULT_API_BASE: &str = "https://api.cloudinary.com/v1_1";
const DELIVERY_BASE: &str = "https://res.cloudinary.com";
const RESOURCE_TYPE: &str = "video";

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: SecretString,
    /// Overridable for tests.
    pub api_base: String,
    pub timeout: Duration,
}

impl CloudinaryConfig {
    pub fn from_env() -> StorageResult<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| StorageError::config_error(format!("{} not set", name)))
        };

        Ok(Self {
            cloud_name: var("CLOUDINARY_CLOUD_NAME")?,
            api_key: var("CLOUDINARY_API_KEY")?,
            api_secret: SecretString::from(var("CLOUDINARY_API_SECRET")?),
            api_base: std::env::var("CLOUDINARY_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            timeout: Duration::from_secs(120),
        })
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Clone)]
pub struct CloudinaryStore {
    http: reqwest::Client,
    config: CloudinaryConfig,
}

impl CloudinaryStore {
    pub fn new(config: CloudinaryConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.cloud_name,
            RESOURCE_TYPE,
            action
        )
    }

    fn sign(&self, params: &BTreeMap<&str, String>) -> String {
        sign_params(params, self.config.api_secret.expose_secret())
    }

    /// Signed parameter set shared by upload and destroy.
    fn signed_params<'a>(&self, mut params: BTreeMap<&'a str, String>) -> BTreeMap<&'a str, String> {
        params.insert("timestamp", Utc::now().timestamp().to_string());
        let signature = self.sign(&params);
        params.insert("signature", signature);
        params.insert("api_key", self.config.api_key.clone());
        params
    }
}

/// Hex SHA-256 of `k1=v1&k2=v2...` (sorted by key) followed by the secret.
pub fn sign_params(params: &BTreeMap<&str, String>, secret: &str) -> String {
    let joined = params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    hex::encode(Sha256::digest(format!("{}{}", joined, secret).as_bytes()))
}

/// Split a storage key into Cloudinary folder and public id.
fn folder_and_public_id(key: &str) -> (String, String) {
    let (folder, name) = key.rsplit_once('/').unwrap_or(("", key));
    (folder.to_string(), file_stem(name).to_string())
}

#[async_trait]
impl ObjectStore for CloudinaryStore {
    fn provider(&self) -> StorageProvider {
        StorageProvider::Cloudinary
    }

    async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        _kind: MediaKind,
    ) -> StorageResult<StoredObject> {
        let (folder, public_id) = folder_and_public_id(key);
        let file_name = key.rsplit('/').next().unwrap_or(key).to_string();
        let size = data.len();

        let mut params = BTreeMap::new();
        params.insert("public_id", public_id);
        if !folder.is_empty() {
            params.insert("folder", folder);
        }
        let params = self.signed_params(params);

        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str(content_type)
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;
        let form = params
            .into_iter()
            .fold(Form::new(), |form, (k, v)| form.text(k, v))
            .part("file", part);

        debug!(key = %key, bytes = size, "Uploading to Cloudinary");
        let response = self.http.post(self.endpoint("upload")).multipart(form).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Cloudinary upload rejected");
            return Err(StorageError::upload_failed(format!(
                "Cloudinary upload error ({}): {}",
                status, body
            )));
        }

        let uploaded: UploadResponse = response.json().await?;
        info!(public_id = %uploaded.public_id, bytes = size, "Uploaded object");
        Ok(StoredObject {
            key: uploaded.public_id,
            url: uploaded.secure_url,
            provider: StorageProvider::Cloudinary,
        })
    }

    async fn delete(&self, key: &str, _kind: MediaKind) -> StorageResult<()> {
        let mut params = BTreeMap::new();
        params.insert("public_id", key.to_string());
        let params = self.signed_params(params);

        let response = self.http.post(self.endpoint("destroy")).form(&params).send().await?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::delete_failed(body));
        }

        let destroyed: DestroyResponse = response.json().await?;
        match destroyed.result.as_str() {
            "ok" | "not found" => Ok(()),
            other => Err(StorageError::delete_failed(other.to_string())),
        }
    }

    async fn url_for(&self, key: &str, _kind: MediaKind) -> StorageResult<String> {
        Ok(format!(
            "{}/{}/{}/upload/{}",
            DELIVERY_BASE, self.config.cloud_name, RESOURCE_TYPE, key
        ))
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        if self.config.cloud_name.is_empty() || self.config.api_key.is_empty() {
            return Err(StorageError::config_error("Cloudinary credentials missing"));
        }
        Ok(())
    }
}
