//! Account lifecycle: registration, verification, login, password reset,
//! federated sign-in and subscription expiry.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use luga_clients::{IdentityClient, Mailer};
use luga_firestore::{FirestoreError, TokenBlacklistRepository, UserRepository};
use luga_models::media::new_record_id;
use luga_models::user::normalize_email;
use luga_models::utils::{validate_email, validate_password, validate_username};
use luga_models::{AuthProvider, PlanTier, User};
use tracing::{info, warn};

use crate::auth::{
    generate_reset_code, hash_password, verify_password, TokenError, TokenKeys, TokenPurpose, RESET_TOKEN_TTL,
};
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};

pub const INVALID_CREDENTIALS: &str = "Invalid email or password";
pub const EMAIL_NOT_VERIFIED: &str = "Email not verified. Check your inbox.";
pub const INVALID_RESET_CODE: &str = "Invalid or expired reset code";

/// Wrong guesses a reset code survives before it is discarded.
const MAX_RESET_ATTEMPTS: u32 = 5;

pub enum Registration {
    Created(User),
    EmailTaken,
}

pub enum Verification {
    AlreadyVerified,
    Verified { access_token: String, email: String },
}

#[derive(Clone)]
pub struct UserService {
    users: UserRepository,
    blacklist: TokenBlacklistRepository,
    tokens: Arc<TokenKeys>,
    mailer: Mailer,
    identity: Arc<IdentityClient>,
    config: Arc<ApiConfig>,
}

impl UserService {
    pub fn new(
        users: UserRepository,
        blacklist: TokenBlacklistRepository,
        tokens: Arc<TokenKeys>,
        mailer: Mailer,
        identity: Arc<IdentityClient>,
        config: Arc<ApiConfig>,
    ) -> Self {
        Self {
            users,
            blacklist,
            tokens,
            mailer,
            identity,
            config,
        }
    }

    pub async fn get(&self, user_id: &str) -> ApiResult<User> {
        self.users
            .get(user_id)
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))
    }

    /// Load a user, dropping an expired subscription back to the free plan first.
    pub async fn get_current(&self, user_id: &str) -> ApiResult<User> {
        let user = self.get(user_id).await?;
        self.refresh_subscription(user).await
    }

    pub async fn refresh_subscription(&self, mut user: User) -> ApiResult<User> {
        let now = Utc::now();
        if user.subscription_expired(now) {
            info!(user_id = %user.id, plan = %user.subscription_plan, "Subscription expired, downgrading");
            user.downgrade(now);
            self.users.save_subscription(&user).await?;
        }
        Ok(user)
    }

    /// Create an unverified password account and send the verification link.
    pub async fn register(&self, email: &str, password: &str, username: &str) -> ApiResult<Registration> {
        validate_email(email)?;
        validate_password(password)?;
        validate_username(username)?;

        let email = normalize_email(email);
        if self.users.find_by_email(&email).await?.is_some() {
            return Ok(Registration::EmailTaken);
        }

        let hash = hash_password(password)?;
        let user = User::new_password_account(new_record_id(), &email, username.trim(), hash);
        match self.users.create(&user).await {
            Ok(()) => {}
            Err(FirestoreError::AlreadyExists(_)) => return Ok(Registration::EmailTaken),
            Err(e) => return Err(e.into()),
        }

        let token = self.tokens.verification_token(&email)?;
        let link = format!(
            "{}/api/user/verify?token={}",
            self.config.api_base_url.trim_end_matches('/'),
            token
        );
        let mailer = self.mailer.clone();
        tokio::spawn(async move {
            if let Err(e) = mailer.send_verification(&email, &link).await {
                warn!(error = %e, "Failed to send verification email");
            }
        });

        Ok(Registration::Created(user))
    }

    pub async fn verify_email(&self, token: &str) -> ApiResult<Verification> {
        let claims = self.tokens.verify(token, TokenPurpose::Verify).map_err(|e| match e {
            TokenError::Expired => ApiError::bad_request("Verification link expired"),
            TokenError::Invalid => ApiError::bad_request("Invalid token"),
        })?;

        let user = self
            .users
            .find_by_email(&claims.sub)
            .await?
            .ok_or_else(|| ApiError::bad_request("Invalid token"))?;

        if user.verified {
            return Ok(Verification::AlreadyVerified);
        }

        self.users.set_verified(&user.id).await?;
        info!(user_id = %user.id, "Email verified");

        Ok(Verification::Verified {
            access_token: self.tokens.access_token(&user.id, &user.email)?,
            email: user.email,
        })
    }

    pub async fn login(&self, email: &str, password: &str) -> ApiResult<(String, User)> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or_else(|| ApiError::bad_request(INVALID_CREDENTIALS))?;

        let matches = user
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(password, hash));
        if !matches {
            return Err(ApiError::bad_request(INVALID_CREDENTIALS));
        }
        if !user.verified {
            return Err(ApiError::bad_request(EMAIL_NOT_VERIFIED));
        }

        let user = self.refresh_subscription(user).await?;
        let token = self.tokens.access_token(&user.id, &user.email)?;
        info!(user_id = %user.id, "User logged in");
        Ok((token, user))
    }

    /// Revoke an access token until it would have expired anyway.
    pub async fn logout(&self, token: &str) -> ApiResult<()> {
        let claims = self.tokens.verify(token, TokenPurpose::Access).map_err(|e| match e {
            TokenError::Expired => ApiError::bad_request("Token has expired"),
            TokenError::Invalid => ApiError::bad_request("Invalid token"),
        })?;

        if !self.blacklist.revoke(token, claims.expires_at()).await? {
            return Err(ApiError::bad_request("Token is already invalidated"));
        }
        info!(user_id = %claims.sub, "User logged out");
        Ok(())
    }

    /// Email a reset code if the account exists. Silent otherwise.
    pub async fn forgot_password(&self, email: &str) -> ApiResult<()> {
        let Some(user) = self.users.find_by_email(email).await? else {
            info!("Password reset requested for unknown email");
            return Ok(());
        };

        let code = generate_reset_code();
        let expires_at = Utc::now() + ChronoDuration::seconds(RESET_TOKEN_TTL.as_secs() as i64);
        self.users
            .set_reset_code(&user.id, &hash_password(&code)?, expires_at)
            .await?;

        let mailer = self.mailer.clone();
        let to = user.email.clone();
        tokio::spawn(async move {
            if let Err(e) = mailer.send_password_reset_code(&to, &code).await {
                warn!(error = %e, "Failed to send password reset code");
            }
        });

        info!(user_id = %user.id, "Issued password reset code");
        Ok(())
    }

    /// Exchange a valid reset code for a short-lived reset token.
    pub async fn verify_reset_code(&self, email: &str, code: &str) -> ApiResult<String> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or_else(|| ApiError::bad_request(INVALID_RESET_CODE))?;

        let live = user.reset_code_expires_at.is_some_and(|at| at > Utc::now());
        let Some(hash) = user.reset_code_hash.as_deref().filter(|_| live) else {
            return Err(ApiError::bad_request(INVALID_RESET_CODE));
        };

        let attempts = user.reset_code_attempts + 1;
        if attempts > MAX_RESET_ATTEMPTS {
            self.users.clear_reset_code(&user.id).await?;
            return Err(ApiError::bad_request(INVALID_RESET_CODE));
        }
        if !self.users.record_reset_attempt(&user, attempts).await? {
            return Err(ApiError::bad_request(INVALID_RESET_CODE));
        }

        if verify_password(code.trim(), hash) {
            self.users.clear_reset_code(&user.id).await?;
            return self.tokens.reset_token(&user.email);
        }
        if attempts >= MAX_RESET_ATTEMPTS {
            warn!(user_id = %user.id, "Reset code locked after too many attempts");
            self.users.clear_reset_code(&user.id).await?;
        }
        Err(ApiError::bad_request(INVALID_RESET_CODE))
    }

    pub async fn reset_password(&self, email: &str, password: &str, reset_token: &str) -> ApiResult<()> {
        let claims = self
            .tokens
            .verify(reset_token, TokenPurpose::Reset)
            .map_err(|_| ApiError::bad_request("Invalid or expired reset token"))?;
        let email = normalize_email(email);
        if claims.sub != email {
            return Err(ApiError::bad_request("Invalid or expired reset token"));
        }
        validate_password(password)?;

        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        self.users.set_password(&user.id, &hash_password(password)?).await?;

        info!(user_id = %user.id, "Password reset");
        Ok(())
    }

    /// Start a purchased plan for the account behind `email`.
    ///
    /// Returns `None` when no account matches.
    pub async fn activate_plan(&self, email: &str, tier: PlanTier) -> ApiResult<Option<User>> {
        let Some(mut user) = self.users.find_by_email(email).await? else {
            warn!(plan = %tier, "Payment for unknown email");
            return Ok(None);
        };

        user.activate_plan(tier, Utc::now());
        self.users.save_subscription(&user).await?;
        info!(user_id = %user.id, plan = %tier, expires = ?user.expire_date, "Activated subscription");
        Ok(Some(user))
    }

    pub async fn google_sign_in(&self, credential: &str) -> ApiResult<(String, User)> {
        let claims = self.identity.verify_google(credential).await?;
        let email = claims
            .email
            .ok_or_else(|| ApiError::bad_request("Google account has no email"))?;
        if claims.email_verified == Some(false) {
            return Err(ApiError::bad_request("Google email is not verified"));
        }
        self.federated_sign_in(&email, claims.name.as_deref(), AuthProvider::Google)
            .await
    }

    pub async fn facebook_sign_in(&self, access_token: &str) -> ApiResult<(String, User)> {
        let profile = self.identity.facebook_profile(access_token).await?;
        let email = profile
            .email
            .ok_or_else(|| ApiError::bad_request("Facebook account has no email"))?;
        self.federated_sign_in(&email, profile.name.as_deref(), AuthProvider::Facebook)
            .await
    }

    /// Find or create a verified user for an identity-provider email.
    async fn federated_sign_in(
        &self,
        email: &str,
        name: Option<&str>,
        provider: AuthProvider,
    ) -> ApiResult<(String, User)> {
        let user = match self.users.find_by_email(email).await? {
            Some(mut user) => {
                if !user.verified {
                    self.users.set_verified(&user.id).await?;
                    user.verified = true;
                }
                self.refresh_subscription(user).await?
            }
            None => {
                let email = normalize_email(email);
                let username = name
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
                let user = User::new_federated(new_record_id(), &email, username, provider);
                self.users.create(&user).await?;
                user
            }
        };

        let token = self.tokens.access_token(&user.id, &user.email)?;
        info!(user_id = %user.id, provider = provider.as_str(), "Federated sign-in");
        Ok((token, user))
    }
}
