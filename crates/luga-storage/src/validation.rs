//! Upload checks and object key layout.

use luga_models::utils::{file_extension, sanitize_file_name};
use luga_models::MediaKind;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Extensions accepted for media uploads.
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mp3", "wav", "webm", "m4a"];

/// Check an incoming media file before it is stored.
pub fn validate_upload(
    file_name: &str,
    content_type: Option<&str>,
    size: usize,
    expected: MediaKind,
) -> StorageResult<()> {
    if size == 0 {
        return Err(StorageError::invalid_upload("Uploaded file is empty."));
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(StorageError::invalid_upload("File size too large"));
    }

    let allowed = file_extension(file_name)
        .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()));
    if !allowed {
        return Err(StorageError::invalid_upload("File type not allowed"));
    }

    let prefix = expected.mime_prefix();
    match content_type {
        Some(ct) if ct.to_ascii_lowercase().starts_with(prefix) => Ok(()),
        _ => Err(StorageError::invalid_upload(format!(
            "File must be {} ({}*)",
            expected.as_str(),
            prefix
        ))),
    }
}

/// `{folder}/{user_id}/{uuid}-{sanitized name}`.
pub fn object_key(folder: &str, user_id: &str, file_name: &str) -> String {
    format!(
        "{}/{}/{}-{}",
        folder.trim_matches('/'),
        user_id,
        Uuid::new_v4().simple(),
        sanitize_file_name(file_name)
    )
}

/// Best-effort content type from an extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    match file_extension(file_name).as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        Some("webm") => "video/webm",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_matching_audio() {
        assert!(validate_upload("voice.MP3", Some("audio/mpeg"), 1024, MediaKind::Audio).is_ok());
    }

    #[test]
    fn test_rejects_empty_and_oversized() {
        let empty = validate_upload("a.mp3", Some("audio/mpeg"), 0, MediaKind::Audio);
        assert!(matches!(empty, Err(StorageError::InvalidUpload(_))));

        let huge = validate_upload("a.mp4", Some("video/mp4"), MAX_UPLOAD_BYTES + 1, MediaKind::Video);
        assert_eq!(huge.unwrap_err().to_string(), "File size too large");
    }

    #[test]
    fn test_rejects_wrong_extension() {
        let err = validate_upload("notes.txt", Some("audio/mpeg"), 10, MediaKind::Audio).unwrap_err();
        assert_eq!(err.to_string(), "File type not allowed");
    }

    #[test]
    fn test_rejects_kind_mismatch() {
        assert!(validate_upload("clip.mp4", Some("video/mp4"), 10, MediaKind::Audio).is_err());
        assert!(validate_upload("clip.mp4", None, 10, MediaKind::Video).is_err());
    }

    #[test]
    fn test_object_key_layout() {
        let key = object_key("/video/", "u1", "my clip (1).mp4");
        let parts: Vec<&str> = key.split('/').collect();
        assert_eq!(parts[0], "video");
        assert_eq!(parts[1], "u1");
        assert!(parts[2].ends_with("-my_clip__1_.mp4"));
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("x.mp3"), "audio/mpeg");
        assert_eq!(content_type_for("x.bin"), "application/octet-stream");
    }
}
