//! Backend-agnostic object storage.

use std::sync::Arc;

use async_trait::async_trait;
use luga_models::{MediaKind, StorageProvider, StoredObject};
use tracing::info;

use crate::cloudinary::{CloudinaryConfig, CloudinaryStore};
use crate::error::StorageResult;
use crate::s3::{S3Config, S3Store};

/// Object storage for user media.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn provider(&self) -> StorageProvider;

    /// Store `data` under `key` and return where it can be fetched.
    async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        kind: MediaKind,
    ) -> StorageResult<StoredObject>;

    async fn delete(&self, key: &str, kind: MediaKind) -> StorageResult<()>;

    /// Fetchable URL for a stored key.
    async fn url_for(&self, key: &str, kind: MediaKind) -> StorageResult<String>;

    async fn check_connectivity(&self) -> StorageResult<()>;
}

/// Which backend to build, from `S3_PROVIDER`.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub provider: StorageProvider,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        let provider = std::env::var("S3_PROVIDER")
            .map(|s| StorageProvider::from_setting(&s))
            .unwrap_or_default();
        Self { provider }
    }
}

/// Build the configured backend.
pub async fn store_from_env() -> StorageResult<Arc<dyn ObjectStore>> {
    let config = StorageConfig::from_env();
    info!(provider = %config.provider, "Initializing object storage");

    Ok(match config.provider {
        StorageProvider::Baidu => Arc::new(S3Store::new(S3Config::from_env()?).await?),
        StorageProvider::Cloudinary => Arc::new(CloudinaryStore::new(CloudinaryConfig::from_env()?)),
    })
}
