//! Atomic quota deduction.
//!
//! The quota map lives on the user document. Deductions read the document,
//! compute the new balance, and write it back conditioned on the document's
//! `updateTime`. A concurrent writer makes the write fail; the deduction is
//! then re-read and retried.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use luga_models::{Quota, QuotaCharge, QuotaKind};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_conflict;
use crate::types::{Document, Fields, FromFirestoreValue, ToFirestoreValue, Value};
use crate::users_repo::USERS;

/// Attempts before giving up on a contended deduction.
const MAX_DEDUCT_ATTEMPTS: u32 = 5;

/// Linear backoff step between attempts.
const RETRY_STEP_MS: u64 = 50;

pub(crate) fn quota_to_value(quota: &Quota) -> Value {
    let fields: HashMap<String, Value> = QuotaKind::ALL
        .iter()
        .map(|kind| (kind.field_name().to_string(), quota.get(*kind).to_firestore_value()))
        .collect();
    Value::map(fields)
}

/// Read the quota map, falling back to the free plan for missing fields.
pub(crate) fn quota_from_document(doc: &Document) -> Quota {
    let defaults = Quota::default();
    let map = doc.raw("quota").and_then(Value::as_map);
    let read = |kind: QuotaKind| {
        map.and_then(|m| m.get(kind.field_name()))
            .and_then(i64::from_firestore_value)
            .unwrap_or_else(|| defaults.get(kind))
    };

    Quota::new(
        read(QuotaKind::Text),
        read(QuotaKind::Audio),
        read(QuotaKind::Video),
        read(QuotaKind::ProcessVideo),
    )
}

/// Repository for per-user quota balances.
#[derive(Clone)]
pub struct QuotaRepository {
    client: FirestoreClient,
}

impl QuotaRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub async fn get(&self, user_id: &str) -> FirestoreResult<Quota> {
        let doc = self
            .client
            .get_document(USERS, user_id)
            .await?
            .ok_or_else(|| FirestoreError::not_found(format!("users/{}", user_id)))?;
        Ok(quota_from_document(&doc))
    }

    /// Take `amount` of `kind` off the user's balance.
    ///
    /// Saturates at zero and leaves unlimited balances alone. Zero-amount
    /// and unlimited charges return without writing.
    pub async fn deduct(&self, user_id: &str, kind: QuotaKind, amount: i64) -> FirestoreResult<QuotaCharge> {
        let mut last_error = None;

        for attempt in 0..MAX_DEDUCT_ATTEMPTS {
            let doc = self
                .client
                .get_document(USERS, user_id)
                .await?
                .ok_or_else(|| {
                    warn!(user_id = %user_id, "User not found when deducting quota");
                    FirestoreError::not_found(format!("users/{}", user_id))
                })?;

            let mut quota = quota_from_document(&doc);
            let charge = quota.deduct(kind, amount);
            if charge.charged == 0 {
                return Ok(charge);
            }

            let fields = Fields::new()
                .set_value("quota", quota_to_value(&quota))
                .set("updated_at", Utc::now());
            let mask = fields.mask();

            match self
                .client
                .update_document_with_precondition(
                    USERS,
                    user_id,
                    fields.into_inner(),
                    Some(mask),
                    doc.update_time.as_deref(),
                )
                .await
            {
                Ok(_) => {
                    info!(
                        user_id = %user_id,
                        kind = %kind,
                        charged = charge.charged,
                        remaining = charge.after,
                        "Deducted quota"
                    );
                    return Ok(charge);
                }
                Err(e) if e.is_precondition_failed() => {
                    debug!(
                        user_id = %user_id,
                        attempt = attempt + 1,
                        "Quota deduction lost a race, retrying"
                    );
                    record_conflict("quota");
                    last_error = Some(e);
                    tokio::time::sleep(Duration::from_millis(RETRY_STEP_MS * (attempt as u64 + 1))).await;
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Failed to deduct quota");
                    return Err(e);
                }
            }
        }

        warn!(
            user_id = %user_id,
            attempts = MAX_DEDUCT_ATTEMPTS,
            error = ?last_error,
            "Giving up on contended quota deduction"
        );
        Err(FirestoreError::Contention(format!("users/{}/quota", user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FirestoreConfig;
    use luga_models::{PlanTier, UNLIMITED};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const USER_DOC: &str = "/v1/projects/test/databases/(default)/documents/users/u1";

    fn user_doc(quota: Quota, update_time: &str) -> serde_json::Value {
        let doc = Document {
            name: Some("projects/test/databases/(default)/documents/users/u1".into()),
            update_time: Some(update_time.into()),
            ..Document::new(
                Fields::new()
                    .set("email", "a@b.c")
                    .set_value("quota", quota_to_value(&quota))
                    .into_inner(),
            )
        };
        serde_json::to_value(doc).unwrap()
    }

    async fn repo(server: &MockServer) -> QuotaRepository {
        let config = FirestoreConfig::emulator("test", server.address().to_string());
        QuotaRepository::new(FirestoreClient::new(config).await.unwrap())
    }

    #[test]
    fn test_quota_value_roundtrip() {
        let quota = Quota::for_tier(PlanTier::Team);
        let doc = Document::new(Fields::new().set_value("quota", quota_to_value(&quota)).into_inner());
        assert_eq!(quota_from_document(&doc), quota);
    }

    #[test]
    fn test_missing_quota_fields_use_free_plan() {
        let partial = Value::map(HashMap::from([(
            "audio_quota".to_string(),
            Value::IntegerValue("42".into()),
        )]));
        let doc = Document::new(Fields::new().set_value("quota", partial).into_inner());
        let quota = quota_from_document(&doc);
        assert_eq!(quota.audio_quota, 42);
        assert_eq!(quota.text_quota, Quota::default().text_quota);
    }

    #[tokio::test]
    async fn test_deduct_writes_with_precondition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(USER_DOC))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(user_doc(Quota::new(12, 100, 0, 0), "2025-01-01T00:00:00Z")),
            )
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(USER_DOC))
            .and(query_param("currentDocument.updateTime", "2025-01-01T00:00:00Z"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(user_doc(Quota::new(10, 100, 0, 0), "2025-01-01T00:00:01Z")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let charge = repo(&server).await.deduct("u1", QuotaKind::Text, 2).await.unwrap();
        assert_eq!(charge.before, 12);
        assert_eq!(charge.after, 10);
        assert!(charge.low_warning);
    }

    #[tokio::test]
    async fn test_unlimited_deduction_skips_write() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(USER_DOC))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(user_doc(Quota::for_tier(PlanTier::Starter), "t1")),
            )
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let charge = repo(&server).await.deduct("u1", QuotaKind::Text, 2).await.unwrap();
        assert_eq!(charge.after, UNLIMITED);
        assert_eq!(charge.charged, 0);
    }

    #[tokio::test]
    async fn test_contention_is_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(USER_DOC))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_doc(Quota::new(5, 5, 5, 1), "t1")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(USER_DOC))
            .respond_with(ResponseTemplate::new(412))
            .expect(MAX_DEDUCT_ATTEMPTS as u64)
            .mount(&server)
            .await;

        let err = repo(&server)
            .await
            .deduct("u1", QuotaKind::Audio, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, FirestoreError::Contention(_)));
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = repo(&server).await.deduct("u1", QuotaKind::Video, 3).await.unwrap_err();
        assert!(matches!(err, FirestoreError::NotFound(_)));
    }
}
