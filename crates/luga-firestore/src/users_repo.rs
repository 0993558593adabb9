//! User accounts.
//!
//! Users live at `users/{id}`. A second document at `user_emails/{digest}`
//! maps a normalized email to its user id; creating it first makes email
//! uniqueness atomic.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use luga_models::user::normalize_email;
use luga_models::{AuthProvider, ChatProvider, PlanTier, SubscriptionStatus, User};

use crate::client::{FirestoreClient, Precondition};
use crate::digest_id;
use crate::error::{FirestoreError, FirestoreResult};
use crate::quota_repo::{quota_from_document, quota_to_value};
use crate::types::{Document, Fields};

pub const USERS: &str = "users";
const USER_EMAILS: &str = "user_emails";

/// Repository for user documents.
#[derive(Clone)]
pub struct UserRepository {
    client: FirestoreClient,
}

impl UserRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub async fn get(&self, user_id: &str) -> FirestoreResult<Option<User>> {
        match self.client.get_document(USERS, user_id).await? {
            Some(doc) => Ok(Some(document_to_user(&doc, user_id)?)),
            None => Ok(None),
        }
    }

    pub async fn find_by_email(&self, email: &str) -> FirestoreResult<Option<User>> {
        let email = normalize_email(email);
        let Some(index) = self.client.get_document(USER_EMAILS, &digest_id(&email)).await? else {
            return Ok(None);
        };
        let user_id: String = index.require("user_id")?;

        let user = self.get(&user_id).await?;
        if user.is_none() {
            warn!(user_id = %user_id, "Email index points at a missing user");
        }
        Ok(user)
    }

    /// Store a new user. Fails with `AlreadyExists` if the email is taken.
    pub async fn create(&self, user: &User) -> FirestoreResult<()> {
        let email_key = digest_id(&user.email);
        let index = Fields::new()
            .set("user_id", user.id.as_str())
            .set("email", user.email.as_str())
            .set("created_at", user.created_at);
        self.client
            .create_document(USER_EMAILS, &email_key, index.into_inner())
            .await?;

        if let Err(e) = self
            .client
            .create_document(USERS, &user.id, user_to_fields(user).into_inner())
            .await
        {
            // Release the email so the user can retry.
            if let Err(cleanup) = self.client.delete_document(USER_EMAILS, &email_key).await {
                warn!(user_id = %user.id, error = %cleanup, "Failed to release email index");
            }
            return Err(e);
        }

        info!(user_id = %user.id, provider = user.auth_provider.as_str(), "Created user");
        Ok(())
    }

    pub async fn set_verified(&self, user_id: &str) -> FirestoreResult<()> {
        self.update(user_id, Fields::new().set("verified", true)).await
    }

    /// Replace the password and clear any pending reset code.
    pub async fn set_password(&self, user_id: &str, password_hash: &str) -> FirestoreResult<()> {
        let fields = Fields::new()
            .set("password_hash", password_hash)
            .set("reset_code_hash", None::<String>)
            .set("reset_code_expires_at", None::<DateTime<Utc>>)
            .set("reset_code_attempts", 0i64);
        self.update(user_id, fields).await
    }

    pub async fn set_reset_code(
        &self,
        user_id: &str,
        code_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> FirestoreResult<()> {
        let fields = Fields::new()
            .set("reset_code_hash", code_hash)
            .set("reset_code_expires_at", expires_at)
            .set("reset_code_attempts", 0i64);
        self.update(user_id, fields).await
    }

    /// Spend one verification attempt on the user's reset code.
    ///
    /// Conditioned on the revision `user` was read at, so concurrent guesses
    /// cannot share an attempt. Returns `false` when another write won.
    pub async fn record_reset_attempt(&self, user: &User, attempts: u32) -> FirestoreResult<bool> {
        let fields = Fields::new()
            .set("reset_code_attempts", i64::from(attempts))
            .set("updated_at", Utc::now());
        let mask = fields.mask();
        let precondition = match user.update_time.as_deref() {
            Some(ts) => Precondition::UpdateTime(ts),
            None => Precondition::Exists,
        };

        match self
            .client
            .update_document_if(USERS, &user.id, fields.into_inner(), mask, precondition)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_precondition_failed() || matches!(e, FirestoreError::NotFound(_)) => {
                debug!(user_id = %user.id, "Reset attempt lost to a concurrent write");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Invalidate any pending reset code.
    pub async fn clear_reset_code(&self, user_id: &str) -> FirestoreResult<()> {
        let fields = Fields::new()
            .set("reset_code_hash", None::<String>)
            .set("reset_code_expires_at", None::<DateTime<Utc>>)
            .set("reset_code_attempts", 0i64);
        self.update(user_id, fields).await
    }

    pub async fn set_level(&self, user_id: &str, level: ChatProvider) -> FirestoreResult<()> {
        self.update(user_id, Fields::new().set("level", level.as_str())).await
    }

    pub async fn set_preferred_voice(&self, user_id: &str, voice_id: &str) -> FirestoreResult<()> {
        self.update(user_id, Fields::new().set("preferred_voice_id", voice_id))
            .await
    }

    /// Persist subscription state and quota together (activation or downgrade).
    pub async fn save_subscription(&self, user: &User) -> FirestoreResult<()> {
        let fields = Fields::new()
            .set("subscription_status", user.subscription_status.as_str())
            .set("subscription_plan", user.subscription_plan.as_str())
            .set("expire_date", user.expire_date)
            .set_value("quota", quota_to_value(&user.quota));
        self.update(&user.id, fields).await?;

        info!(
            user_id = %user.id,
            plan = %user.subscription_plan,
            status = %user.subscription_status,
            "Saved subscription"
        );
        Ok(())
    }

    /// Masked write that always bumps `updated_at`.
    async fn update(&self, user_id: &str, fields: Fields) -> FirestoreResult<()> {
        let fields = fields.set("updated_at", Utc::now());
        let mask = fields.mask();
        self.client
            .update_document(USERS, user_id, fields.into_inner(), Some(mask))
            .await?;
        Ok(())
    }
}

pub(crate) fn user_to_fields(user: &User) -> Fields {
    Fields::new()
        .set("id", user.id.as_str())
        .set("email", user.email.as_str())
        .set("username", user.username.as_str())
        .set("password_hash", user.password_hash.clone())
        .set("verified", user.verified)
        .set("auth_provider", user.auth_provider.as_str())
        .set("level", user.level.as_str())
        .set("subscription_status", user.subscription_status.as_str())
        .set("subscription_plan", user.subscription_plan.as_str())
        .set("expire_date", user.expire_date)
        .set_value("quota", quota_to_value(&user.quota))
        .set("preferred_voice_id", user.preferred_voice_id.clone())
        .set("reset_code_hash", user.reset_code_hash.clone())
        .set("reset_code_expires_at", user.reset_code_expires_at)
        .set("reset_code_attempts", i64::from(user.reset_code_attempts))
        .set("created_at", user.created_at)
        .set("updated_at", user.updated_at)
}

pub(crate) fn document_to_user(doc: &Document, user_id: &str) -> FirestoreResult<User> {
    let email: String = doc.require("email")?;
    let now = Utc::now();

    Ok(User {
        id: user_id.to_string(),
        username: doc
            .get("username")
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string()),
        email,
        password_hash: doc.get("password_hash"),
        verified: doc.get("verified").unwrap_or(false),
        auth_provider: doc
            .get::<String>("auth_provider")
            .map(|s| AuthProvider::from_str_or_password(&s))
            .unwrap_or_default(),
        level: doc
            .get::<String>("level")
            .and_then(|s| ChatProvider::parse(&s))
            .unwrap_or_default(),
        subscription_status: doc
            .get::<String>("subscription_status")
            .map(|s| SubscriptionStatus::from_str_or_inactive(&s))
            .unwrap_or_default(),
        subscription_plan: doc
            .get::<String>("subscription_plan")
            .map(|s| PlanTier::from_str_or_free(&s))
            .unwrap_or_default(),
        expire_date: doc.get("expire_date"),
        quota: quota_from_document(doc),
        preferred_voice_id: doc.get("preferred_voice_id"),
        reset_code_hash: doc.get("reset_code_hash"),
        reset_code_expires_at: doc.get("reset_code_expires_at"),
        reset_code_attempts: doc
            .get::<i64>("reset_code_attempts")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0),
        created_at: doc.get("created_at").unwrap_or(now),
        updated_at: doc.get("updated_at").unwrap_or(now),
        update_time: doc.update_time.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FirestoreConfig;
    use luga_models::Quota;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_user_document_roundtrip() {
        let mut user = User::new_password_account("u1", "ana@example.com", "ana", "hash");
        user.activate_plan(PlanTier::Creator, Utc::now());
        user.preferred_voice_id = Some("voice-1".into());

        let doc = Document {
            name: Some("projects/p/databases/(default)/documents/users/u1".into()),
            ..Document::new(user_to_fields(&user).into_inner())
        };
        let parsed = document_to_user(&doc, "u1").unwrap();

        assert_eq!(parsed.email, "ana@example.com");
        assert_eq!(parsed.password_hash.as_deref(), Some("hash"));
        assert_eq!(parsed.subscription_plan, PlanTier::Creator);
        assert_eq!(parsed.subscription_status, SubscriptionStatus::Active);
        assert_eq!(parsed.quota, Quota::for_tier(PlanTier::Creator));
        assert_eq!(parsed.preferred_voice_id.as_deref(), Some("voice-1"));
        assert!(parsed.expire_date.is_some());
    }

    #[test]
    fn test_sparse_document_gets_defaults() {
        let doc = Document::new(Fields::new().set("email", "old@example.com").into_inner());
        let user = document_to_user(&doc, "legacy").unwrap();
        assert_eq!(user.username, "old");
        assert!(!user.verified);
        assert_eq!(user.level, ChatProvider::OpenAi);
        assert_eq!(user.quota, Quota::for_tier(PlanTier::Free));
    }

    const USER_DOC: &str = "/v1/projects/test/databases/(default)/documents/users/u1";

    async fn repo(server: &MockServer) -> UserRepository {
        let config = FirestoreConfig::emulator("test", server.address().to_string());
        UserRepository::new(FirestoreClient::new(config).await.unwrap())
    }

    #[tokio::test]
    async fn test_reset_attempt_written_at_read_revision() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(USER_DOC))
            .and(query_param("currentDocument.updateTime", "2025-01-01T00:00:00Z"))
            .and(query_param("updateMask.fieldPaths", "reset_code_attempts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/test/databases/(default)/documents/users/u1",
                "updateTime": "2025-01-01T00:00:01Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut user = User::new_password_account("u1", "ana@example.com", "ana", "hash");
        user.update_time = Some("2025-01-01T00:00:00Z".into());
        assert!(repo(&server).await.record_reset_attempt(&user, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_attempt_lost_to_concurrent_write() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(USER_DOC))
            .respond_with(ResponseTemplate::new(412).set_body_string("FAILED_PRECONDITION"))
            .mount(&server)
            .await;

        let mut user = User::new_password_account("u1", "ana@example.com", "ana", "hash");
        user.update_time = Some("2025-01-01T00:00:00Z".into());
        assert!(!repo(&server).await.record_reset_attempt(&user, 2).await.unwrap());
    }

    #[test]
    fn test_document_without_email_is_rejected() {
        let doc = Document::new(Fields::new().set("username", "x").into_inner());
        assert!(document_to_user(&doc, "bad").is_err());
    }
}
