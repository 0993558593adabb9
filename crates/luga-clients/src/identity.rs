//! Google ID token and Facebook access token verification.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::http::{check_status, http_client, optional_env};

const GOOGLE_CERTS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];
const FACEBOOK_GRAPH_URL: &str = "https://graph.facebook.com";
const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Expected audience of Google ID tokens. Google sign-in is off without it.
    pub google_client_id: Option<String>,
    pub google_certs_url: String,
    pub facebook_graph_url: String,
}

impl IdentityConfig {
    pub fn from_env() -> Self {
        Self {
            google_client_id: optional_env("GOOGLE_CLIENT_ID"),
            google_certs_url: optional_env("GOOGLE_CERTS_URL").unwrap_or_else(|| GOOGLE_CERTS_URL.to_string()),
            facebook_graph_url: optional_env("FACEBOOK_GRAPH_URL")
                .unwrap_or_else(|| FACEBOOK_GRAPH_URL.to_string()),
        }
    }
}

/// Claims of a verified Google ID token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleClaims {
    pub sub: String,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub iss: String,
    pub exp: i64,
}

/// Profile returned by the Graph API `/me` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacebookProfile {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkKey>,
}

#[derive(Debug, Deserialize)]
struct JwkKey {
    kid: String,
    n: String,
    e: String,
}

struct CachedKeys {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
}

impl CachedKeys {
    fn is_fresh(&self) -> bool {
        self.fetched_at.is_some_and(|at| at.elapsed() < JWKS_CACHE_TTL)
    }
}

pub struct IdentityClient {
    http: Client,
    config: IdentityConfig,
    jwks: RwLock<CachedKeys>,
}

impl IdentityClient {
    /// Keys are fetched lazily on first use.
    pub fn new(config: IdentityConfig) -> Self {
        Self {
            http: http_client(Duration::from_secs(10)),
            config,
            jwks: RwLock::new(CachedKeys {
                keys: HashMap::new(),
                fetched_at: None,
            }),
        }
    }

    async fn refresh_keys(&self) -> ClientResult<()> {
        debug!("Refreshing Google JWKS");
        let response = self.http.get(&self.config.google_certs_url).send().await?;
        let jwks: JwksResponse = check_status("google", response).await?.json().await?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    keys.insert(jwk.kid, key);
                }
                Err(e) => warn!(kid = %jwk.kid, error = %e, "Skipping malformed JWK"),
            }
        }

        let mut cache = self.jwks.write().await;
        debug!(count = keys.len(), "Refreshed Google JWKS");
        cache.keys = keys;
        cache.fetched_at = Some(Instant::now());
        Ok(())
    }

    async fn key_for(&self, kid: &str) -> ClientResult<Option<DecodingKey>> {
        let fresh = self.jwks.read().await.is_fresh();
        if !fresh {
            if let Err(e) = self.refresh_keys().await {
                warn!(error = %e, "Failed to refresh Google JWKS");
                if self.jwks.read().await.keys.is_empty() {
                    return Err(e);
                }
            }
        }
        Ok(self.jwks.read().await.keys.get(kid).cloned())
    }

    /// Verify a Google Sign-In credential.
    pub async fn verify_google(&self, id_token: &str) -> ClientResult<GoogleClaims> {
        let client_id = self
            .config
            .google_client_id
            .as_deref()
            .ok_or_else(|| ClientError::config("GOOGLE_CLIENT_ID not set"))?;

        let header = decode_header(id_token)
            .map_err(|e| ClientError::InvalidToken(format!("Invalid token header: {}", e)))?;
        let kid = header
            .kid
            .ok_or_else(|| ClientError::InvalidToken("Token missing key ID".into()))?;
        let key = self
            .key_for(&kid)
            .await?
            .ok_or_else(|| ClientError::InvalidToken("Unknown key ID".into()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&GOOGLE_ISSUERS[..]);
        validation.set_audience(&[client_id]);

        let data = decode::<GoogleClaims>(id_token, &key, &validation)
            .map_err(|e| ClientError::InvalidToken(format!("Token validation failed: {}", e)))?;
        Ok(data.claims)
    }

    /// Resolve a Facebook user access token to a profile.
    pub async fn facebook_profile(&self, access_token: &str) -> ClientResult<FacebookProfile> {
        let url = format!("{}/me", self.config.facebook_graph_url.trim_end_matches('/'));
        let response = self
            .http
            .get(url)
            .query(&[("fields", "id,name,email"), ("access_token", access_token)])
            .send()
            .await?;
        let response = check_status("facebook", response).await.map_err(|e| match e {
            ClientError::InvalidRequest(msg) | ClientError::Unauthorized(msg) => ClientError::InvalidToken(msg),
            other => other,
        })?;
        Ok(response.json().await?)
    }
}
