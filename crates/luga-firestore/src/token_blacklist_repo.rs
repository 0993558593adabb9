//! Revoked access tokens, keyed by a digest of the token.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::client::FirestoreClient;
use crate::digest_id;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::Fields;

const TOKEN_BLACKLIST: &str = "token_blacklist";

#[derive(Clone)]
pub struct TokenBlacklistRepository {
    client: FirestoreClient,
}

impl TokenBlacklistRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    /// Revoke `token` until its own expiry. Returns `false` if it was already revoked.
    pub async fn revoke(&self, token: &str, expires_at: DateTime<Utc>) -> FirestoreResult<bool> {
        let fields = Fields::new()
            .set("expires_at", expires_at)
            .set("revoked_at", Utc::now());

        match self
            .client
            .create_document(TOKEN_BLACKLIST, &digest_id(token), fields.into_inner())
            .await
        {
            Ok(_) => Ok(true),
            Err(FirestoreError::AlreadyExists(_)) => {
                debug!("Token already revoked");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// True while a revoked token has not yet expired on its own.
    pub async fn is_revoked(&self, token: &str) -> FirestoreResult<bool> {
        let Some(doc) = self
            .client
            .get_document(TOKEN_BLACKLIST, &digest_id(token))
            .await?
        else {
            return Ok(false);
        };
        let expires_at: Option<DateTime<Utc>> = doc.get("expires_at");
        Ok(expires_at.map_or(true, |at| at > Utc::now()))
    }
}
