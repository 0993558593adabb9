//! Access-token handling for Firestore requests.
//!
//! Service-account tokens are cached and refreshed shortly before they
//! expire. Only one task refreshes at a time; the others wait on the lock
//! and reuse the fresh token. The local emulator accepts a fixed token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gcp_auth::TokenProvider;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{FirestoreError, FirestoreResult};

/// Refresh this long before the token's stated expiry.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the provider reports an unusable expiry.
const FALLBACK_TTL: Duration = Duration::from_secs(50 * 60);

/// OAuth scope for the Firestore REST API.
pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

/// Token the Firestore emulator accepts for admin access.
pub const EMULATOR_TOKEN: &str = "owner";

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn fresh(&self, now: Instant) -> bool {
        now + REFRESH_MARGIN < self.expires_at
    }

    fn unexpired(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Where tokens come from.
pub enum TokenSource {
    /// Google service account (or any other `gcp_auth` provider).
    Provider(Arc<dyn TokenProvider>),
    /// Fixed bearer token, used with the emulator.
    Static(String),
}

/// Cached access tokens.
pub struct TokenCache {
    source: TokenSource,
    cached: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(source: TokenSource) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
        }
    }

    pub fn emulator() -> Self {
        Self::new(TokenSource::Static(EMULATOR_TOKEN.to_string()))
    }

    /// Drop the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    /// Current bearer token.
    pub async fn get_token(&self) -> FirestoreResult<String> {
        let provider = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Provider(p) => p,
        };

        if let Some(token) = self.cached.read().await.as_ref() {
            if token.fresh(Instant::now()) {
                return Ok(token.value.clone());
            }
        }

        let mut slot = self.cached.write().await;
        // Another task may have refreshed while this one waited for the lock.
        if let Some(token) = slot.as_ref() {
            if token.fresh(Instant::now()) {
                return Ok(token.value.clone());
            }
        }

        match provider.token(&[FIRESTORE_SCOPE]).await {
            Ok(token) => {
                let remaining = (token.expires_at() - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                let ttl = if remaining.is_zero() { FALLBACK_TTL } else { remaining };

                let value = token.as_str().to_string();
                *slot = Some(CachedToken {
                    value: value.clone(),
                    expires_at: Instant::now() + ttl,
                });
                debug!(ttl_secs = ttl.as_secs(), "Refreshed Firestore access token");
                Ok(value)
            }
            Err(e) => match slot.as_ref() {
                Some(old) if old.unexpired(Instant::now()) => {
                    warn!("Token refresh failed, reusing current token: {}", e);
                    Ok(old.value.clone())
                }
                _ => Err(FirestoreError::auth_error(format!(
                    "Failed to obtain access token: {}",
                    e
                ))),
            },
        }
    }
}
