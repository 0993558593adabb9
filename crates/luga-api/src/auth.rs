//! Password hashing, signed tokens and the authenticated-user extractor.

use std::time::Duration;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{Rng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Lifetime of email verification links.
pub const VERIFY_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Lifetime of password reset codes and the token they unlock.
pub const RESET_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPurpose {
    Access,
    Verify,
    Reset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id for access tokens, email for verify and reset tokens.
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub purpose: TokenPurpose,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    Invalid,
}

/// HS256 signer and verifier for every token the API hands out.
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
}

impl TokenKeys {
    pub fn new(secret: &SecretString, access_ttl: Duration) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            access_ttl,
        }
    }

    fn sign(&self, sub: &str, email: Option<&str>, purpose: TokenPurpose, ttl: Duration) -> ApiResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            email: email.map(str::to_string),
            exp: now + ttl.as_secs() as i64,
            iat: now,
            jti: Uuid::new_v4().to_string(),
            purpose,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ApiError::internal(format!("Failed to sign token: {}", e)))
    }

    pub fn access_token(&self, user_id: &str, email: &str) -> ApiResult<String> {
        self.sign(user_id, Some(email), TokenPurpose::Access, self.access_ttl)
    }

    pub fn verification_token(&self, email: &str) -> ApiResult<String> {
        self.sign(email, None, TokenPurpose::Verify, VERIFY_TOKEN_TTL)
    }

    pub fn reset_token(&self, email: &str) -> ApiResult<String> {
        self.sign(email, None, TokenPurpose::Reset, RESET_TOKEN_TTL)
    }

    /// Decode and check signature, expiry and purpose.
    pub fn verify(&self, token: &str, purpose: TokenPurpose) -> Result<Claims, TokenError> {
        let validation = Validation::new(Algorithm::HS256);
        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => {
                    debug!(error = %e, "Token rejected");
                    TokenError::Invalid
                }
            })?
            .claims;

        if claims.purpose != purpose {
            return Err(TokenError::Invalid);
        }
        Ok(claims)
    }
}

/// argon2id PHC string for `password`.
pub fn hash_password(password: &str) -> ApiResult<String> {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt)
        .map_err(|e| ApiError::internal(format!("Failed to encode salt: {}", e)))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))
}

/// Check `password` against a stored PHC string. Malformed hashes never match.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!(error = %e, "Stored password hash is malformed");
            false
        }
    }
}

/// Six-digit, zero-padded reset code.
pub fn generate_reset_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// Authenticated user extracted from a Bearer access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: Option<String>,
    /// Raw token, kept for logout.
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::unauthorized("Not authenticated"))?;
        let token = bearer.token();

        let claims = state
            .tokens
            .verify(token, TokenPurpose::Access)
            .map_err(|e| match e {
                TokenError::Expired => ApiError::unauthorized("Token has expired"),
                TokenError::Invalid => ApiError::unauthorized("Could not validate credentials"),
            })?;

        if state.blacklist.is_revoked(token).await? {
            return Err(ApiError::unauthorized("Token has been revoked"));
        }

        Ok(AuthUser {
            expires_at: claims.expires_at(),
            user_id: claims.sub,
            email: claims.email,
            token: token.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> TokenKeys {
        TokenKeys::new(&SecretString::from("test-secret"), Duration::from_secs(3600))
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-phc-string"));
    }

    #[test]
    fn test_access_token_claims() {
        let keys = keys();
        let token = keys.access_token("u1", "ana@example.com").unwrap();
        let claims = keys.verify(&token, TokenPurpose::Access).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.email.as_deref(), Some("ana@example.com"));
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_purpose_is_enforced() {
        let keys = keys();
        let verify = keys.verification_token("ana@example.com").unwrap();
        assert_eq!(keys.verify(&verify, TokenPurpose::Access).unwrap_err(), TokenError::Invalid);
        assert_eq!(keys.verify(&verify, TokenPurpose::Verify).unwrap().sub, "ana@example.com");

        let reset = keys.reset_token("ana@example.com").unwrap();
        assert!(keys.verify(&reset, TokenPurpose::Verify).is_err());
        let claims = keys.verify(&reset, TokenPurpose::Reset).unwrap();
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn test_expired_and_foreign_tokens() {
        let keys = keys();
        let past = Utc::now().timestamp() - 3600;
        let claims = Claims {
            sub: "u1".into(),
            email: None,
            exp: past,
            iat: past - 60,
            jti: "j".into(),
            purpose: TokenPurpose::Access,
        };
        let expired = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap();
        assert_eq!(keys.verify(&expired, TokenPurpose::Access).unwrap_err(), TokenError::Expired);

        let other = TokenKeys::new(&SecretString::from("other"), Duration::from_secs(60))
            .access_token("u1", "a@b.co")
            .unwrap();
        assert_eq!(keys.verify(&other, TokenPurpose::Access).unwrap_err(), TokenError::Invalid);
        assert_eq!(keys.verify("garbage", TokenPurpose::Access).unwrap_err(), TokenError::Invalid);
    }

    #[test]
    fn test_reset_code_format() {
        for _ in 0..50 {
            let code = generate_reset_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
