//! Input validation and sanitization.
//!
//! - Callback URL validation (SSRF protection)
//! - Prompt and title sanitization
//! - Path id checks

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::warn;
use url::{Host, Url};

/// Maximum URL length to prevent DoS attacks.
const MAX_URL_LENGTH: usize = 2048;

/// Maximum prompt length.
pub const MAX_PROMPT_LENGTH: usize = 5000;

/// Maximum title length.
pub const MAX_TITLE_LENGTH: usize = 500;

/// Maximum text accepted for speech synthesis.
pub const MAX_TTS_TEXT_LENGTH: usize = 5000;

const MAX_ID_LENGTH: usize = 128;

const BLOCKED_HOSTS: [&str; 3] = ["localhost", "metadata", "metadata.google.internal"];

/// Validate a caller-supplied callback URL.
///
/// Only http(s) URLs pointing at public hosts are accepted.
pub fn validate_webhook_url(raw: &str) -> Result<String, String> {
    if raw.len() > MAX_URL_LENGTH {
        return Err(format!("URL exceeds maximum length of {} characters", MAX_URL_LENGTH));
    }

    let raw = raw.trim();
    if raw.is_empty() {
        return Err("URL cannot be empty".to_string());
    }

    let parsed = Url::parse(raw).map_err(|e| format!("Invalid URL format: {}", e))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(format!(
                "Invalid protocol '{}'. Only HTTP and HTTPS are allowed.",
                scheme
            ))
        }
    }

    let blocked = match parsed.host() {
        None => return Err("URL must have a valid host".to_string()),
        Some(Host::Domain(domain)) => {
            let domain = domain.to_lowercase();
            BLOCKED_HOSTS
                .iter()
                .any(|b| domain == *b || domain.ends_with(&format!(".{}", b)))
        }
        Some(Host::Ipv4(ip)) => is_internal_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_internal_ip(IpAddr::V6(ip)),
    };

    if blocked {
        warn!(url = %raw, "Blocked callback URL");
        return Err("URL appears to target an internal or restricted endpoint".to_string());
    }

    Ok(parsed.to_string())
}

fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_internal_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_internal_v4(mapped);
            }
            is_internal_v6(v6)
        }
    }
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xc0) == 64)
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

/// Strip control characters (keeping newlines and tabs) and cap the length.
pub fn sanitize_prompt(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .take(MAX_PROMPT_LENGTH)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Sanitize a title for safe storage.
pub fn sanitize_title(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_TITLE_LENGTH)
        .collect()
}

/// Record, job and conversation ids: ASCII alphanumerics, `-` and `_`.
pub fn is_valid_record_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LENGTH
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_callback_urls_accepted() {
        assert_eq!(
            validate_webhook_url("https://hooks.example.com/sync?x=1").unwrap(),
            "https://hooks.example.com/sync?x=1"
        );
        assert!(validate_webhook_url("http://8.8.8.8/cb").is_ok());
    }

    #[test]
    fn test_internal_callback_urls_blocked() {
        for url in [
            "http://127.0.0.1/cb",
            "http://localhost:8000/cb",
            "http://api.localhost/cb",
            "http://10.1.2.3/cb",
            "http://172.16.0.1/cb",
            "http://192.168.1.1/cb",
            "http://169.254.169.254/latest/meta-data/",
            "http://metadata.google.internal/computeMetadata/v1/",
            "http://[::1]/cb",
            "http://[fd00::1]/cb",
            "http://[fe80::1]/cb",
            "http://[::ffff:127.0.0.1]/cb",
            "http://0.0.0.0/cb",
        ] {
            assert!(validate_webhook_url(url).is_err(), "{} should be blocked", url);
        }
    }

    #[test]
    fn test_invalid_protocols() {
        assert!(validate_webhook_url("ftp://example.com/x").is_err());
        assert!(validate_webhook_url("javascript:alert(1)").is_err());
        assert!(validate_webhook_url("  ").is_err());
        assert!(validate_webhook_url(&format!("https://example.com/{}", "a".repeat(3000))).is_err());
    }

    #[test]
    fn test_sanitize_prompt() {
        assert_eq!(sanitize_prompt("  hi\u{0007} there\n "), "hi there");
        assert_eq!(sanitize_prompt(&"x".repeat(6000)).len(), MAX_PROMPT_LENGTH);
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("  Trip\tplans  "), "Tripplans");
        assert_eq!(sanitize_title(&"t".repeat(600)).chars().count(), MAX_TITLE_LENGTH);
    }

    #[test]
    fn test_record_id_validation() {
        assert!(is_valid_record_id("1700000000000"));
        assert!(is_valid_record_id("3f2b8c4e9a1d4e6f8b7a6c5d4e3f2a1b"));
        assert!(is_valid_record_id("a1b2c3d4-e5f6-7890-abcd-ef1234567890"));
        assert!(!is_valid_record_id(""));
        assert!(!is_valid_record_id("../etc/passwd"));
        assert!(!is_valid_record_id("has/slash"));
        assert!(!is_valid_record_id(&"a".repeat(200)));
    }
}
