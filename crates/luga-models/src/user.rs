//! User account model.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::plan::{PlanTier, SubscriptionStatus, PLAN_DURATION_DAYS};
use crate::quota::Quota;

/// Chat backend selected by the user.
///
/// All three providers speak the OpenAI chat-completions protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChatProvider {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "deepseek")]
    DeepSeek,
    Grok,
}

impl ChatProvider {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(ChatProvider::OpenAi),
            "deepseek" => Some(ChatProvider::DeepSeek),
            "grok" => Some(ChatProvider::Grok),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatProvider::OpenAi => "openai",
            ChatProvider::DeepSeek => "deepseek",
            ChatProvider::Grok => "grok",
        }
    }

    /// Model requested from this provider.
    pub fn model(&self) -> &'static str {
        match self {
            ChatProvider::OpenAi => "gpt-4o",
            ChatProvider::DeepSeek => "deepseek-chat",
            ChatProvider::Grok => "grok-2-latest",
        }
    }

    /// Default API base URL.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ChatProvider::OpenAi => "https://api.openai.com/v1",
            ChatProvider::DeepSeek => "https://api.deepseek.com",
            ChatProvider::Grok => "https://api.x.ai/v1",
        }
    }
}

impl std::fmt::Display for ChatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the account authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    #[default]
    Password,
    Google,
    Facebook,
}

impl AuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Password => "password",
            AuthProvider::Google => "google",
            AuthProvider::Facebook => "facebook",
        }
    }

    pub fn from_str_or_password(s: &str) -> Self {
        match s {
            "google" => AuthProvider::Google,
            "facebook" => AuthProvider::Facebook,
            _ => AuthProvider::Password,
        }
    }
}

/// Stored user record.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    /// PHC-format password hash. Absent for OAuth-only accounts.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub verified: bool,
    pub auth_provider: AuthProvider,
    pub level: ChatProvider,
    pub subscription_status: SubscriptionStatus,
    pub subscription_plan: PlanTier,
    pub expire_date: Option<DateTime<Utc>>,
    pub quota: Quota,
    pub preferred_voice_id: Option<String>,
    #[serde(skip_serializing)]
    pub reset_code_hash: Option<String>,
    #[serde(skip_serializing)]
    pub reset_code_expires_at: Option<DateTime<Utc>>,
    /// Verification attempts spent on the current reset code.
    #[serde(skip_serializing, default)]
    pub reset_code_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub update_time: Option<String>,
}

impl User {
    /// New unverified password account on the free plan.
    pub fn new_password_account(
        id: impl Into<String>,
        email: impl Into<String>,
        username: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            email: normalize_email(&email.into()),
            username: username.into(),
            password_hash: Some(password_hash.into()),
            verified: false,
            auth_provider: AuthProvider::Password,
            level: ChatProvider::default(),
            subscription_status: SubscriptionStatus::Inactive,
            subscription_plan: PlanTier::Free,
            expire_date: None,
            quota: Quota::for_tier(PlanTier::Free),
            preferred_voice_id: None,
            reset_code_hash: None,
            reset_code_expires_at: None,
            reset_code_attempts: 0,
            created_at: now,
            updated_at: now,
            update_time: None,
        }
    }

    /// New account federated from an identity provider. Already verified.
    pub fn new_federated(
        id: impl Into<String>,
        email: impl Into<String>,
        username: impl Into<String>,
        provider: AuthProvider,
    ) -> Self {
        let mut user = Self::new_password_account(id, email, username, String::new());
        user.password_hash = None;
        user.verified = true;
        user.auth_provider = provider;
        user
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription_status == SubscriptionStatus::Active
    }

    /// Active subscription whose expiry date has passed.
    pub fn subscription_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_subscribed() && self.expire_date.is_some_and(|exp| exp < now)
    }

    /// Drop back to the free plan.
    pub fn downgrade(&mut self, now: DateTime<Utc>) {
        self.subscription_status = SubscriptionStatus::Inactive;
        self.subscription_plan = PlanTier::Free;
        self.quota = Quota::for_tier(PlanTier::Free);
        self.updated_at = now;
    }

    /// Activate a purchased plan starting at `now`.
    pub fn activate_plan(&mut self, tier: PlanTier, now: DateTime<Utc>) {
        self.subscription_status = SubscriptionStatus::Active;
        self.subscription_plan = tier;
        self.expire_date = Some(plan_expiry(now));
        self.quota = Quota::for_tier(tier);
        self.updated_at = now;
    }
}

/// Expiry for a plan purchased at `now`.
pub fn plan_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::days(PLAN_DURATION_DAYS)
}

/// Lowercase and trim an email address for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
