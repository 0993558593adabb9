//! Firestore REST API client and LugaAI repositories.
//!
//! This crate provides:
//! - An authenticated REST client with token caching and retry
//! - Typed repositories for users, quota, chat history, media and lip-sync jobs
//! - Optimistic-lock quota deduction
//! - A revoked-token blacklist
//! - A processed-event ledger for Stripe webhooks

pub mod client;
pub mod conversation_repo;
pub mod error;
pub mod lipsync_repo;
pub mod media_repo;
pub mod metrics;
pub mod quota_repo;
pub mod retry;
pub mod stripe_event_repo;
pub mod token_blacklist_repo;
pub mod token_cache;
pub mod types;
pub mod users_repo;

use sha2::{Digest, Sha256};

pub use client::{FirestoreClient, FirestoreConfig, Precondition};
pub use conversation_repo::ConversationRepository;
pub use error::{FirestoreError, FirestoreResult};
pub use lipsync_repo::LipSyncJobRepository;
pub use media_repo::MediaRepository;
pub use quota_repo::QuotaRepository;
pub use retry::RetryConfig;
pub use stripe_event_repo::StripeEventRepository;
pub use token_blacklist_repo::TokenBlacklistRepository;
pub use types::{Document, Fields, FromFirestoreValue, StructuredQuery, ToFirestoreValue, Value};
pub use users_repo::UserRepository;

/// Document id derived from an arbitrary string (emails, tokens).
///
/// Hex SHA-256, so it is stable and safe to use in a resource path.
pub fn digest_id(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_id_is_stable_hex() {
        let id = digest_id("ana@example.com");
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, digest_id("ana@example.com"));
        assert_ne!(id, digest_id("bob@example.com"));
    }
}
