//! Transactional email over SMTP.

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use luga_models::QuotaKind;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use crate::error::{ClientError, ClientResult};
use crate::http::{optional_env, record_call};

const DEFAULT_FROM: &str = "LugaAI <no-reply@luga.ai>";

#[derive(Debug, Clone)]
pub struct MailConfig {
    /// `None` disables delivery.
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub from: String,
}

impl MailConfig {
    pub fn from_env() -> Self {
        Self {
            host: optional_env("SMTP_SERVER"),
            port: optional_env("SMTP_PORT").and_then(|p| p.parse().ok()).unwrap_or(465),
            username: optional_env("SMTP_USERNAME"),
            password: optional_env("SMTP_PASSWORD").map(SecretString::from),
            from: optional_env("MAIL_FROM").unwrap_or_else(|| DEFAULT_FROM.to_string()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            host: None,
            port: 465,
            username: None,
            password: None,
            from: DEFAULT_FROM.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Mailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
}

impl Mailer {
    pub fn new(config: MailConfig) -> ClientResult<Self> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| ClientError::config(format!("Invalid MAIL_FROM: {}", e)))?;

        let transport = match &config.host {
            Some(host) => {
                let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                    .map_err(|e| ClientError::config(format!("Invalid SMTP server: {}", e)))?
                    .port(config.port);
                if let (Some(user), Some(password)) = (&config.username, &config.password) {
                    builder = builder.credentials(Credentials::new(
                        user.clone(),
                        password.expose_secret().to_string(),
                    ));
                }
                info!(host = %host, port = config.port, "SMTP delivery enabled");
                Some(builder.build())
            }
            None => {
                warn!("SMTP_SERVER not set; outgoing mail will be logged and dropped");
                None
            }
        };

        Ok(Self { transport, from })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub async fn send_verification(&self, to: &str, link: &str) -> ClientResult<()> {
        let body = format!(
            "<p>Welcome to LugaAI!</p>\
             <p>Please confirm your email address by clicking the link below:</p>\
             <p><a href=\"{link}\">Verify my email</a></p>\
             <p>This link expires in 24 hours.</p>"
        );
        self.send(to, "Verify your LugaAI account", body).await
    }

    pub async fn send_password_reset_code(&self, to: &str, code: &str) -> ClientResult<()> {
        let body = format!(
            "<p>Your LugaAI password reset code is:</p>\
             <h2>{code}</h2>\
             <p>The code expires in 15 minutes. If you did not request a reset, ignore this email.</p>"
        );
        self.send(to, "Your LugaAI password reset code", body).await
    }

    pub async fn send_low_quota_notice(&self, to: &str, kind: QuotaKind) -> ClientResult<()> {
        let body = format!(
            "<p>{}</p><p>Upgrade your plan to keep creating without interruption.</p>",
            kind.warning_message()
        );
        self.send(to, "Your LugaAI quota is running low", body).await
    }

    async fn send(&self, to: &str, subject: &str, html: String) -> ClientResult<()> {
        let message = self.build_message(to, subject, html)?;
        let Some(transport) = &self.transport else {
            info!(to, subject, "Mail delivery disabled, skipping");
            return Ok(());
        };

        match transport.send(message).await {
            Ok(_) => {
                record_call("smtp", "ok");
                info!(to, subject, "Sent email");
                Ok(())
            }
            Err(e) => {
                record_call("smtp", "error");
                warn!(to, subject, error = %e, "Email delivery failed");
                Err(ClientError::Mail(e.to_string()))
            }
        }
    }

    fn build_message(&self, to: &str, subject: &str, html: String) -> ClientResult<Message> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| ClientError::Mail(format!("Invalid recipient: {}", e)))?;
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| ClientError::Mail(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_headers() {
        let mailer = Mailer::new(MailConfig::disabled()).unwrap();
        let message = mailer
            .build_message("user@example.com", "Hello", "<p>hi</p>".into())
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("To: user@example.com"));
        assert!(raw.contains("Subject: Hello"));
        assert!(raw.contains("Content-Type: text/html"));
    }

    #[test]
    fn test_bad_recipient() {
        let mailer = Mailer::new(MailConfig::disabled()).unwrap();
        let err = mailer.build_message("not an address", "x", String::new()).unwrap_err();
        assert!(matches!(err, ClientError::Mail(_)));
    }

    #[test]
    fn test_bad_sender_is_config_error() {
        let mut config = MailConfig::disabled();
        config.from = "nope".into();
        assert!(matches!(Mailer::new(config), Err(ClientError::Config(_))));
    }

    #[tokio::test]
    async fn test_disabled_mailer_skips_delivery() {
        let mailer = Mailer::new(MailConfig::disabled()).unwrap();
        assert!(!mailer.is_enabled());
        mailer.send_password_reset_code("user@example.com", "123456").await.unwrap();
        mailer.send_low_quota_notice("user@example.com", QuotaKind::Audio).await.unwrap();
    }
}
