//! Input validation helpers shared by the API and storage crates.

use validator::ValidateEmail;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Maximum length kept from a user-supplied file name.
const MAX_FILE_NAME_LEN: usize = 100;

/// Validation failure for user input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Password must be at least {MIN_PASSWORD_LEN} characters")]
    PasswordTooShort,

    #[error("Username cannot be empty")]
    EmptyUsername,
}

pub fn validate_email(email: &str) -> Result<(), InputError> {
    let email = email.trim();
    // Require a dotted domain on top of the RFC check.
    let has_dotted_domain = email
        .rsplit_once('@')
        .is_some_and(|(_, domain)| domain.contains('.') && !domain.ends_with('.'));

    if email.validate_email() && has_dotted_domain {
        Ok(())
    } else {
        Err(InputError::InvalidEmail)
    }
}

pub fn validate_password(password: &str) -> Result<(), InputError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(InputError::PasswordTooShort);
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<(), InputError> {
    if username.trim().is_empty() {
        return Err(InputError::EmptyUsername);
    }
    Ok(())
}

/// Reduce a client-supplied file name to a safe storage name.
///
/// Keeps ASCII alphanumerics, `-`, `_` and `.`, replaces everything else
/// with `_`, and strips any directory components.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');

    let truncated: String = cleaned.chars().take(MAX_FILE_NAME_LEN).collect();
    if truncated.is_empty() {
        "file".to_string()
    } else {
        truncated
    }
}

/// Lowercased extension of a file name, without the dot.
pub fn file_extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// File name without its extension.
pub fn file_stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email(" first.last+tag@sub.example.org ").is_ok());
        assert_eq!(validate_email("user@localhost"), Err(InputError::InvalidEmail));
        assert_eq!(validate_email("no-at-sign"), Err(InputError::InvalidEmail));
        assert_eq!(validate_email("a@b."), Err(InputError::InvalidEmail));
        assert_eq!(validate_email(""), Err(InputError::InvalidEmail));
    }

    #[test]
    fn test_validate_password_and_username() {
        assert!(validate_password("12345678").is_ok());
        assert_eq!(validate_password("short"), Err(InputError::PasswordTooShort));
        assert_eq!(validate_username("  "), Err(InputError::EmptyUsername));
        assert!(validate_username("ana").is_ok());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("my clip.mp4"), "my_clip.mp4");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\voice.wav"), "voice.wav");
        assert_eq!(sanitize_file_name("..."), "file");
        assert_eq!(sanitize_file_name("видео.mov"), "_____.mov");
        assert_eq!(sanitize_file_name(&"a".repeat(300)).len(), 100);
    }

    #[test]
    fn test_file_extension_and_stem() {
        assert_eq!(file_extension("clip.MP4").as_deref(), Some("mp4"));
        assert_eq!(file_extension("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(file_extension("noext"), None);
        assert_eq!(file_extension(".hidden"), None);
        assert_eq!(file_stem("voice.sample.wav"), "voice.sample");
        assert_eq!(file_stem("plain"), "plain");
    }
}
