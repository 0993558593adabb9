//! API configuration.

use std::time::Duration;

use secrecy::SecretString;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second per client IP
    pub rate_limit_rps: u32,
    /// Request timeout
    pub request_timeout: Duration,
    /// Max request body size; media uploads go up to 100 MB.
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,

    /// HS256 signing key for access, verification and reset tokens.
    pub jwt_secret: SecretString,
    pub access_token_ttl: Duration,
    /// Where the web app lives; used for redirects and checkout URLs.
    pub frontend_url: String,
    /// Public base URL of this API; used in verification links.
    pub api_base_url: String,

    pub lipsync_poller_enabled: bool,
    pub lipsync_poll_interval: Duration,
    /// Jobs still running after this long are failed.
    pub lipsync_job_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            request_timeout: Duration::from_secs(120),
            max_body_size: 110 * 1024 * 1024,
            environment: "development".to_string(),
            jwt_secret: SecretString::from("dev-secret-change-me"),
            access_token_ttl: Duration::from_secs(1440 * 60),
            frontend_url: "http://localhost:3000".to_string(),
            api_base_url: "http://localhost:8000".to_string(),
            lipsync_poller_enabled: true,
            lipsync_poll_interval: Duration::from_secs(30),
            lipsync_job_timeout: Duration::from_secs(2 * 60 * 60),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

impl ApiConfig {
    /// Create config from environment variables.
    ///
    /// `JWT_SECRET` is mandatory in production.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let environment = std::env::var("ENVIRONMENT").unwrap_or(defaults.environment);

        let jwt_secret = match std::env::var("JWT_SECRET").ok().filter(|s| !s.is_empty()) {
            Some(secret) => SecretString::from(secret),
            None if environment.eq_ignore_ascii_case("production") => {
                anyhow::bail!("JWT_SECRET must be set in production")
            }
            None => defaults.jwt_secret,
        };

        let lipsync_poll_interval = match env_parse::<u64>("LIPSYNC_POLL_INTERVAL_SECS") {
            Some(0) => anyhow::bail!("LIPSYNC_POLL_INTERVAL_SECS must be at least 1"),
            Some(secs) => Duration::from_secs(secs),
            None => defaults.lipsync_poll_interval,
        };

        Ok(Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT").or_else(|| env_parse("PORT")).unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_parse("RATE_LIMIT_RPS").unwrap_or(defaults.rate_limit_rps),
            request_timeout: env_parse("REQUEST_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_body_size: env_parse("MAX_BODY_SIZE").unwrap_or(defaults.max_body_size),
            environment,
            jwt_secret,
            access_token_ttl: env_parse::<u64>("ACCESS_TOKEN_EXPIRE_MINUTES")
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.access_token_ttl),
            frontend_url: std::env::var("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            api_base_url: std::env::var("API_BASE_URL").unwrap_or(defaults.api_base_url),
            lipsync_poller_enabled: env_flag("ENABLE_LIPSYNC_POLLER", true),
            lipsync_poll_interval,
            lipsync_job_timeout: env_parse("LIPSYNC_JOB_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lipsync_job_timeout),
        })
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn frontend(&self, path: &str) -> String {
        format!("{}{}", self.frontend_url.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        for name in [
            "ENVIRONMENT",
            "JWT_SECRET",
            "API_PORT",
            "PORT",
            "ACCESS_TOKEN_EXPIRE_MINUTES",
            "ENABLE_LIPSYNC_POLLER",
            "LIPSYNC_POLL_INTERVAL_SECS",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();
        let config = ApiConfig::from_env().unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.access_token_ttl, Duration::from_secs(86_400));
        assert!(config.lipsync_poller_enabled);
        assert_eq!(config.lipsync_poll_interval, Duration::from_secs(30));
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear();
        std::env::set_var("PORT", "9000");
        std::env::set_var("ACCESS_TOKEN_EXPIRE_MINUTES", "15");
        std::env::set_var("ENABLE_LIPSYNC_POLLER", "false");
        let config = ApiConfig::from_env().unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.access_token_ttl, Duration::from_secs(900));
        assert!(!config.lipsync_poller_enabled);
        clear();
    }

    #[test]
    #[serial]
    fn test_production_requires_secret() {
        clear();
        std::env::set_var("ENVIRONMENT", "production");
        assert!(ApiConfig::from_env().is_err());
        std::env::set_var("JWT_SECRET", "s");
        assert!(ApiConfig::from_env().unwrap().is_production());
        clear();
    }

    #[test]
    #[serial]
    fn test_zero_poll_interval_rejected() {
        clear();
        std::env::set_var("LIPSYNC_POLL_INTERVAL_SECS", "0");
        assert!(ApiConfig::from_env().is_err());
        std::env::set_var("LIPSYNC_POLL_INTERVAL_SECS", "5");
        assert_eq!(ApiConfig::from_env().unwrap().lipsync_poll_interval, Duration::from_secs(5));
        clear();
    }

    #[test]
    fn test_frontend_join() {
        let config = ApiConfig {
            frontend_url: "https://app.luga.ai/".into(),
            ..ApiConfig::default()
        };
        assert_eq!(config.frontend("/login"), "https://app.luga.ai/login");
    }
}
