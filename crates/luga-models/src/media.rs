//! Stored media records: audio, video, cloned voices.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Object storage backend that holds a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Cloudinary,
    Baidu,
}

impl StorageProvider {
    /// Parse the `S3_PROVIDER` setting. Anything that is not Baidu means Cloudinary.
    pub fn from_setting(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "baidu" | "bos" => StorageProvider::Baidu,
            _ => StorageProvider::Cloudinary,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageProvider::Cloudinary => "cloudinary",
            StorageProvider::Baidu => "baidu",
        }
    }
}

impl std::fmt::Display for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Broad media class of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// Required MIME prefix for uploads of this kind.
    pub fn mime_prefix(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio/",
            MediaKind::Video => "video/",
        }
    }
}

/// Where an audio file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioSource {
    /// Synthesized by text-to-speech.
    #[default]
    Tts,
    /// Uploaded by the user.
    Upload,
    /// Cloned-voice preview.
    Preview,
    /// Voice sample uploaded for cloning.
    Sample,
}

impl AudioSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioSource::Tts => "tts",
            AudioSource::Upload => "upload",
            AudioSource::Preview => "preview",
            AudioSource::Sample => "sample",
        }
    }

    pub fn from_str_or_tts(s: &str) -> Self {
        match s {
            "upload" => AudioSource::Upload,
            "preview" => AudioSource::Preview,
            "sample" => AudioSource::Sample,
            _ => AudioSource::Tts,
        }
    }
}

/// Audio file owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AudioRecord {
    pub id: String,
    pub user_id: String,
    pub voice_id: Option<String>,
    pub file_name: String,
    /// User-editable label.
    pub display_name: String,
    pub url: String,
    pub storage_key: String,
    pub provider: StorageProvider,
    pub source: AudioSource,
    pub duration_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl AudioRecord {
    pub fn new(
        user_id: impl Into<String>,
        file_name: impl Into<String>,
        stored: StoredObject,
        source: AudioSource,
    ) -> Self {
        let file_name = file_name.into();
        Self {
            id: new_record_id(),
            user_id: user_id.into(),
            voice_id: None,
            display_name: file_name.clone(),
            file_name,
            url: stored.url,
            storage_key: stored.key,
            provider: stored.provider,
            source,
            duration_seconds: None,
            created_at: Utc::now(),
        }
    }
}

/// Video file owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoRecord {
    pub id: String,
    pub user_id: String,
    pub file_name: String,
    pub url: String,
    pub storage_key: String,
    pub provider: StorageProvider,
    pub created_at: DateTime<Utc>,
}

impl VideoRecord {
    pub fn new(user_id: impl Into<String>, file_name: impl Into<String>, stored: StoredObject) -> Self {
        Self {
            id: new_record_id(),
            user_id: user_id.into(),
            file_name: file_name.into(),
            url: stored.url,
            storage_key: stored.key,
            provider: stored.provider,
            created_at: Utc::now(),
        }
    }
}

/// Voice cloned on ElevenLabs for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClonedVoice {
    pub voice_id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of an upload to object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
    pub provider: StorageProvider,
}

/// Fresh identifier for a stored record.
pub fn new_record_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Estimate MP3 duration from its size at a constant bitrate.
///
/// Rounds up and never reports less than one second for non-empty audio.
pub fn mp3_duration_secs(byte_len: usize, bitrate_kbps: u32) -> i64 {
    if byte_len == 0 || bitrate_kbps == 0 {
        return 0;
    }
    let bytes_per_sec = (bitrate_kbps as u64 * 1000) / 8;
    (byte_len as u64).div_ceil(bytes_per_sec).max(1) as i64
}

/// Rough speech length for `text`, used to pre-check audio quota before synthesis.
pub fn estimate_speech_secs(text: &str) -> i64 {
    const CHARS_PER_SECOND: usize = 15;
    text.chars().count().div_ceil(CHARS_PER_SECOND).max(1) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_provider_from_setting() {
        assert_eq!(StorageProvider::from_setting("BAIDU"), StorageProvider::Baidu);
        assert_eq!(StorageProvider::from_setting("cloudinary"), StorageProvider::Cloudinary);
        assert_eq!(StorageProvider::from_setting(""), StorageProvider::Cloudinary);
    }

    #[test]
    fn test_mp3_duration() {
        // 128 kbps = 16000 bytes/s
        assert_eq!(mp3_duration_secs(16_000, 128), 1);
        assert_eq!(mp3_duration_secs(16_001, 128), 2);
        assert_eq!(mp3_duration_secs(160_000, 128), 10);
        assert_eq!(mp3_duration_secs(10, 128), 1);
        assert_eq!(mp3_duration_secs(0, 128), 0);
    }

    #[test]
    fn test_estimate_speech_secs() {
        assert_eq!(estimate_speech_secs("hi"), 1);
        assert_eq!(estimate_speech_secs(&"a".repeat(30)), 2);
        // Spaces are spoken time too.
        assert_eq!(estimate_speech_secs(&"a ".repeat(31)), 5);
        assert_eq!(estimate_speech_secs(&"é".repeat(16)), 2);
    }

    #[test]
    fn test_audio_record_from_stored_object() {
        let stored = StoredObject {
            key: "tts/u1/abc.mp3".into(),
            url: "https://cdn/abc.mp3".into(),
            provider: StorageProvider::Baidu,
        };
        let record = AudioRecord::new("u1", "abc.mp3", stored, AudioSource::Tts);
        assert_eq!(record.display_name, "abc.mp3");
        assert_eq!(record.storage_key, "tts/u1/abc.mp3");
        assert_eq!(record.provider, StorageProvider::Baidu);
        assert_eq!(record.id.len(), 32);
    }
}
