//! S3-compatible storage (Baidu BOS or any S3 endpoint).

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use luga_models::{MediaKind, StorageProvider, StoredObject};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

/// Default lifetime of presigned URLs.
pub const DEFAULT_URL_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Read `BAIDU_BOS_{name}`, falling back to `S3_{name}`.
fn env_either(name: &str) -> Option<String> {
    std::env::var(format!("BAIDU_BOS_{}", name))
        .or_else(|_| std::env::var(format!("S3_{}", name)))
        .ok()
        .filter(|v| !v.is_empty())
}

fn required(name: &str) -> StorageResult<String> {
    env_either(name).ok_or_else(|| StorageError::config_error(format!("BAIDU_BOS_{} not set", name)))
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub region: String,
    pub url_ttl: Duration,
}

impl S3Config {
    pub fn from_env() -> StorageResult<Self> {
        let mut endpoint_url = required("ENDPOINT")?;
        if !endpoint_url.starts_with("http") {
            endpoint_url = format!("https://{}", endpoint_url);
        }

        Ok(Self {
            endpoint_url,
            access_key_id: required("ACCESS_KEY_ID")?,
            secret_access_key: required("SECRET_ACCESS_KEY")?,
            bucket_name: required("BUCKET_NAME")?,
            region: env_either("REGION").unwrap_or_else(|| "bj".to_string()),
            url_ttl: Duration::from_secs(
                std::env::var("STORAGE_URL_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_URL_TTL_SECS),
            ),
        })
    }
}

#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    url_ttl: Duration,
}

impl S3Store {
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "luga-bos",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
            url_ttl: config.url_ttl,
        })
    }

    async fn presign_get(&self, key: &str) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(self.url_ttl)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn provider(&self) -> StorageProvider {
        StorageProvider::Baidu
    }

    async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        _kind: MediaKind,
    ) -> StorageResult<StoredObject> {
        let size = data.len();
        debug!("Uploading {} bytes to {}", size, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!(key = %key, bytes = size, "Uploaded object");
        Ok(StoredObject {
            key: key.to_string(),
            url: self.presign_get(key).await?,
            provider: StorageProvider::Baidu,
        })
    }

    async fn delete(&self, key: &str, _kind: MediaKind) -> StorageResult<()> {
        debug!("Deleting {}", key);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        Ok(())
    }

    async fn url_for(&self, key: &str, _kind: MediaKind) -> StorageResult<String> {
        self.presign_get(key).await
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("Bucket connectivity check failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for name in ["ENDPOINT", "ACCESS_KEY_ID", "SECRET_ACCESS_KEY", "BUCKET_NAME", "REGION"] {
            std::env::remove_var(format!("BAIDU_BOS_{}", name));
            std::env::remove_var(format!("S3_{}", name));
        }
        std::env::remove_var("STORAGE_URL_TTL_SECS");
    }

    #[test]
    #[serial]
    fn test_config_from_bos_env() {
        clear_env();
        std::env::set_var("BAIDU_BOS_ENDPOINT", "bj.bcebos.com");
        std::env::set_var("BAIDU_BOS_ACCESS_KEY_ID", "ak");
        std::env::set_var("BAIDU_BOS_SECRET_ACCESS_KEY", "sk");
        std::env::set_var("S3_BUCKET_NAME", "luga");
        std::env::set_var("STORAGE_URL_TTL_SECS", "60");

        let config = S3Config::from_env().unwrap();
        assert_eq!(config.endpoint_url, "https://bj.bcebos.com");
        assert_eq!(config.bucket_name, "luga");
        assert_eq!(config.region, "bj");
        assert_eq!(config.url_ttl, Duration::from_secs(60));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_secret_is_config_error() {
        clear_env();
        std::env::set_var("BAIDU_BOS_ENDPOINT", "bj.bcebos.com");
        let err = S3Config::from_env().unwrap_err();
        assert!(matches!(err, StorageError::ConfigError(_)));
        clear_env();
    }

    #[tokio::test]
    async fn test_presigned_url_targets_bucket_path() {
        let store = S3Store::new(S3Config {
            endpoint_url: "https://bj.bcebos.com".into(),
            access_key_id: "ak".into(),
            secret_access_key: "sk".into(),
            bucket_name: "luga".into(),
            region: "bj".into(),
            url_ttl: Duration::from_secs(300),
        })
        .await
        .unwrap();

        let url = store.url_for("video/u1/abc-clip.mp4", MediaKind::Video).await.unwrap();
        assert!(url.starts_with("https://bj.bcebos.com/luga/video/u1/abc-clip.mp4?"));
        assert!(url.contains("X-Amz-Expires=300"));
    }
}
