//! Per-user media: audio files, uploaded videos and cloned voices.

use chrono::Utc;
use tracing::info;

use luga_models::{AudioRecord, AudioSource, ClonedVoice, StorageProvider, VideoRecord};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{Document, Fields, StructuredQuery};

const AUDIO: &str = "audio";
const VIDEOS: &str = "videos";
const VOICES: &str = "voices";

/// Hard cap on list reads.
const MAX_LIST: u32 = 200;

pub struct MediaRepository {
    client: FirestoreClient,
    user_id: String,
}

impl MediaRepository {
    pub fn new(client: FirestoreClient, user_id: impl Into<String>) -> Self {
        Self {
            client,
            user_id: user_id.into(),
        }
    }

    fn parent(&self) -> String {
        format!("users/{}", self.user_id)
    }

    fn collection(&self, name: &str) -> String {
        format!("users/{}/{}", self.user_id, name)
    }

    // ---------------------------------------------------------------------
    // Audio
    // ---------------------------------------------------------------------

    pub async fn create_audio(&self, record: &AudioRecord) -> FirestoreResult<()> {
        let fields = Fields::new()
            .set("user_id", record.user_id.as_str())
            .set("voice_id", record.voice_id.clone())
            .set("file_name", record.file_name.as_str())
            .set("display_name", record.display_name.as_str())
            .set("url", record.url.as_str())
            .set("storage_key", record.storage_key.as_str())
            .set("provider", record.provider.as_str())
            .set("source", record.source.as_str())
            .set("duration_seconds", record.duration_seconds)
            .set("created_at", record.created_at);

        self.client
            .create_document(&self.collection(AUDIO), &record.id, fields.into_inner())
            .await?;
        info!(user_id = %self.user_id, audio_id = %record.id, source = record.source.as_str(), "Stored audio record");
        Ok(())
    }

    pub async fn get_audio(&self, audio_id: &str) -> FirestoreResult<Option<AudioRecord>> {
        let doc = self.client.get_document(&self.collection(AUDIO), audio_id).await?;
        doc.map(|d| document_to_audio(&d, &self.user_id)).transpose()
    }

    /// Audio records, newest first, optionally restricted to one source.
    pub async fn list_audio(&self, source: Option<AudioSource>) -> FirestoreResult<Vec<AudioRecord>> {
        let mut query = StructuredQuery::collection(AUDIO).limit(MAX_LIST);
        if let Some(source) = source {
            query = query.where_eq("source", source.as_str());
        }

        let docs = self.client.run_query(&self.parent(), query).await?;
        let mut records = docs
            .iter()
            .map(|d| document_to_audio(d, &self.user_id))
            .collect::<FirestoreResult<Vec<_>>>()?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Change the user-visible label of an audio file. `None` if it does not exist.
    pub async fn rename_audio(&self, audio_id: &str, display_name: &str) -> FirestoreResult<Option<AudioRecord>> {
        // A masked PATCH would create a missing document.
        let Some(existing) = self.client.get_document(&self.collection(AUDIO), audio_id).await? else {
            return Ok(None);
        };

        let fields = Fields::new().set("display_name", display_name);
        let mask = fields.mask();
        let doc = self
            .client
            .update_document_with_precondition(
                &self.collection(AUDIO),
                audio_id,
                fields.into_inner(),
                Some(mask),
                existing.update_time.as_deref(),
            )
            .await?;
        document_to_audio(&doc, &self.user_id).map(Some)
    }

    // ---------------------------------------------------------------------
    // Video
    // ---------------------------------------------------------------------

    pub async fn create_video(&self, record: &VideoRecord) -> FirestoreResult<()> {
        let fields = Fields::new()
            .set("user_id", record.user_id.as_str())
            .set("file_name", record.file_name.as_str())
            .set("url", record.url.as_str())
            .set("storage_key", record.storage_key.as_str())
            .set("provider", record.provider.as_str())
            .set("created_at", record.created_at);

        self.client
            .create_document(&self.collection(VIDEOS), &record.id, fields.into_inner())
            .await?;
        info!(user_id = %self.user_id, video_id = %record.id, "Stored video record");
        Ok(())
    }

    pub async fn get_video(&self, video_id: &str) -> FirestoreResult<Option<VideoRecord>> {
        let doc = self.client.get_document(&self.collection(VIDEOS), video_id).await?;
        doc.map(|d| document_to_video(&d, &self.user_id)).transpose()
    }

    pub async fn delete_video(&self, video_id: &str) -> FirestoreResult<()> {
        self.client.delete_document(&self.collection(VIDEOS), video_id).await
    }

    // ---------------------------------------------------------------------
    // Cloned voices
    // ---------------------------------------------------------------------

    pub async fn create_voice(&self, voice: &ClonedVoice) -> FirestoreResult<()> {
        let fields = Fields::new()
            .set("user_id", voice.user_id.as_str())
            .set("name", voice.name.as_str())
            .set("description", voice.description.clone())
            .set("created_at", voice.created_at);

        self.client
            .create_document(&self.collection(VOICES), &voice.voice_id, fields.into_inner())
            .await?;
        Ok(())
    }

    pub async fn list_voices(&self) -> FirestoreResult<Vec<ClonedVoice>> {
        let query = StructuredQuery::collection(VOICES).limit(MAX_LIST);
        let docs = self.client.run_query(&self.parent(), query).await?;

        let mut voices: Vec<ClonedVoice> = docs
            .iter()
            .filter_map(|d| {
                Some(ClonedVoice {
                    voice_id: d.id()?.to_string(),
                    user_id: self.user_id.clone(),
                    name: d.get("name").unwrap_or_default(),
                    description: d.get("description"),
                    created_at: d.get("created_at").unwrap_or_else(Utc::now),
                })
            })
            .collect();
        voices.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(voices)
    }

    pub async fn owns_voice(&self, voice_id: &str) -> FirestoreResult<bool> {
        Ok(self
            .client
            .get_document(&self.collection(VOICES), voice_id)
            .await?
            .is_some())
    }
}

fn provider_of(doc: &Document) -> StorageProvider {
    doc.get::<String>("provider")
        .map(|p| StorageProvider::from_setting(&p))
        .unwrap_or_default()
}

fn document_to_audio(doc: &Document, user_id: &str) -> FirestoreResult<AudioRecord> {
    let id = doc
        .id()
        .ok_or_else(|| FirestoreError::invalid_response("audio document has no name"))?;
    let file_name: String = doc.require("file_name")?;

    Ok(AudioRecord {
        id: id.to_string(),
        user_id: user_id.to_string(),
        voice_id: doc.get("voice_id"),
        display_name: doc.get("display_name").unwrap_or_else(|| file_name.clone()),
        file_name,
        url: doc.require("url")?,
        storage_key: doc.get("storage_key").unwrap_or_default(),
        provider: provider_of(doc),
        source: doc
            .get::<String>("source")
            .map(|s| AudioSource::from_str_or_tts(&s))
            .unwrap_or_default(),
        duration_seconds: doc.get("duration_seconds"),
        created_at: doc.get("created_at").unwrap_or_else(Utc::now),
    })
}

fn document_to_video(doc: &Document, user_id: &str) -> FirestoreResult<VideoRecord> {
    let id = doc
        .id()
        .ok_or_else(|| FirestoreError::invalid_response("video document has no name"))?;

    Ok(VideoRecord {
        id: id.to_string(),
        user_id: user_id.to_string(),
        file_name: doc.require("file_name")?,
        url: doc.require("url")?,
        storage_key: doc.get("storage_key").unwrap_or_default(),
        provider: provider_of(doc),
        created_at: doc.get("created_at").unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_to_audio_defaults() {
        let doc = Document {
            name: Some("x/users/u1/audio/a1".into()),
            ..Document::new(
                Fields::new()
                    .set("file_name", "hello.mp3")
                    .set("url", "https://cdn/hello.mp3")
                    .set("provider", "baidu")
                    .set("source", "upload")
                    .into_inner(),
            )
        };
        let record = document_to_audio(&doc, "u1").unwrap();
        assert_eq!(record.id, "a1");
        assert_eq!(record.display_name, "hello.mp3");
        assert_eq!(record.provider, StorageProvider::Baidu);
        assert_eq!(record.source, AudioSource::Upload);
    }

    #[test]
    fn test_document_to_video_requires_url() {
        let doc = Document {
            name: Some("x/users/u1/videos/v1".into()),
            ..Document::new(Fields::new().set("file_name", "clip.mp4").into_inner())
        };
        assert!(document_to_video(&doc, "u1").is_err());
    }
}
