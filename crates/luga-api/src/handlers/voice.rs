//! Text-to-speech endpoints under `/api/voice`.

use axum::extract::{Multipart, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use luga_clients::elevenlabs::TTS_BITRATE_KBPS;
use luga_clients::Voice;
use luga_models::media::{estimate_speech_secs, mp3_duration_secs};
use luga_models::{AudioRecord, AudioSource, MediaKind, QuotaKind};
use luga_storage::{object_key, validate_upload};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::handlers::form::UploadForm;
use crate::metrics;
use crate::security::{is_valid_record_id, sanitize_title, MAX_TTS_TEXT_LENGTH};
use crate::services::documents::extract_text;
use crate::services::ChargeSummary;
use crate::state::AppState;

#[derive(Serialize)]
pub struct VoicesResponse {
    pub voices: Vec<Voice>,
}

/// ElevenLabs voice library.
pub async fn list_voices(State(state): State<AppState>) -> ApiResult<Json<VoicesResponse>> {
    let voices = state.providers.elevenlabs.list_voices().await?;
    Ok(Json(VoicesResponse { voices }))
}

/// Where synthesized speech is stored and how it is labelled.
pub(crate) struct SpeechTarget {
    pub folder: &'static str,
    pub source: AudioSource,
}

pub(crate) const TTS_TARGET: SpeechTarget = SpeechTarget {
    folder: "tts",
    source: AudioSource::Tts,
};

/// Synthesize `text`, store the MP3, record it and charge the measured seconds.
///
/// The audio balance is checked against an estimate before calling ElevenLabs.
pub(crate) async fn synthesize(
    state: &AppState,
    user_id: &str,
    voice_id: &str,
    text: &str,
    target: SpeechTarget,
) -> ApiResult<(AudioRecord, ChargeSummary)> {
    state
        .quota
        .ensure(user_id, QuotaKind::Audio, estimate_speech_secs(text))
        .await?;
    let account = state.user_service.get_current(user_id).await?;

    let audio = state.providers.elevenlabs.text_to_speech(voice_id, text).await?;
    if audio.is_empty() {
        return Err(ApiError::internal("Failed to generate audio content"));
    }
    let seconds = mp3_duration_secs(audio.len(), TTS_BITRATE_KBPS);

    let file_name = format!("{}_{}.mp3", target.source.as_str(), voice_id);
    let key = object_key(target.folder, user_id, &file_name);
    let stored = state.store.upload(&key, audio, "audio/mpeg", MediaKind::Audio).await?;

    let mut record = AudioRecord::new(user_id, file_name, stored, target.source);
    record.voice_id = Some(voice_id.to_string());
    record.duration_seconds = Some(seconds);
    state.media(user_id).create_audio(&record).await?;

    let charge = state
        .quota
        .charge(user_id, Some(&account.email), QuotaKind::Audio, seconds)
        .await?;
    metrics::record_tts_seconds(seconds);

    info!(
        user_id = %user_id,
        audio_id = %record.id,
        voice_id = %voice_id,
        seconds,
        source = target.source.as_str(),
        "Stored synthesized speech"
    );
    Ok((record, ChargeSummary::from(&charge)))
}

#[derive(Deserialize)]
pub struct TextToSpeechRequest {
    #[serde(default)]
    pub voice_id: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Serialize)]
pub struct AudioResponse {
    #[serde(flatten)]
    pub audio: AudioRecord,
    #[serde(flatten)]
    pub quota: ChargeSummary,
}

pub async fn text_to_speech(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<TextToSpeechRequest>,
) -> ApiResult<Json<AudioResponse>> {
    let text = request.text.trim();
    if text.is_empty() {
        return Err(ApiError::unprocessable("Text cannot be empty"));
    }
    if text.chars().count() > MAX_TTS_TEXT_LENGTH {
        return Err(ApiError::unprocessable(format!(
            "Text is too long (max {} characters)",
            MAX_TTS_TEXT_LENGTH
        )));
    }
    let voice_id = request.voice_id.trim();
    if voice_id.is_empty() {
        return Err(ApiError::unprocessable("Voice ID is required"));
    }

    let (audio, quota) = synthesize(&state, &user.user_id, voice_id, text, TTS_TARGET).await?;
    Ok(Json(AudioResponse { audio, quota }))
}

/// All audio owned by the user, newest first.
pub async fn list_audio(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<AudioRecord>>> {
    Ok(Json(state.media(&user.user_id).list_audio(None).await?))
}

#[derive(Deserialize)]
pub struct RenameAudioRequest {
    pub audio_id: String,
    pub new_name: String,
}

#[derive(Serialize)]
pub struct RenameAudioResponse {
    pub message: &'static str,
    pub audio: AudioRecord,
}

pub async fn update_audio_name(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<RenameAudioRequest>,
) -> ApiResult<Json<RenameAudioResponse>> {
    if !is_valid_record_id(&request.audio_id) {
        return Err(ApiError::bad_request("Invalid audio ID"));
    }
    let name = sanitize_title(&request.new_name);
    if name.is_empty() {
        return Err(ApiError::unprocessable("Name cannot be empty"));
    }

    let audio = state
        .media(&user.user_id)
        .rename_audio(&request.audio_id, &name)
        .await?
        .ok_or_else(|| ApiError::not_found("Audio not found"))?;

    Ok(Json(RenameAudioResponse {
        message: "Audio name updated successfully",
        audio,
    }))
}

#[derive(Serialize)]
pub struct VoiceUploadResponse {
    pub user_id: String,
    pub voice_id: String,
    pub message: &'static str,
}

/// Store a voice sample, or pick a library or cloned voice as the user's default.
pub async fn upload_voice(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> ApiResult<Json<VoiceUploadResponse>> {
    let mut form = UploadForm::read(multipart).await?;

    if let Some(file) = form.take_file("file") {
        validate_upload(
            &file.file_name,
            file.content_type.as_deref(),
            file.data.len(),
            MediaKind::Audio,
        )?;
        let content_type = file.content_type_or("audio/mpeg").to_string();
        let key = object_key("voice-samples", &user.user_id, &file.file_name);
        let stored = state
            .store
            .upload(&key, file.data, &content_type, MediaKind::Audio)
            .await?;

        let record = AudioRecord::new(&user.user_id, file.file_name, stored, AudioSource::Sample);
        state.media(&user.user_id).create_audio(&record).await?;
        state.users.set_preferred_voice(&user.user_id, &record.id).await?;

        info!(user_id = %user.user_id, audio_id = %record.id, "Uploaded voice sample");
        return Ok(Json(VoiceUploadResponse {
            user_id: user.user_id,
            voice_id: record.id,
            message: "Voice file uploaded successfully.",
        }));
    }

    let Some(voice_id) = form.text("voice_id").map(str::to_string) else {
        return Err(ApiError::bad_request(
            "Please either upload a voice file or provide a valid voice_id.",
        ));
    };

    let known = state.media(&user.user_id).owns_voice(&voice_id).await?
        || state
            .providers
            .elevenlabs
            .list_voices()
            .await?
            .iter()
            .any(|v| v.voice_id == voice_id);
    if !known {
        return Err(ApiError::bad_request("Invalid voice ID."));
    }
    state.users.set_preferred_voice(&user.user_id, &voice_id).await?;

    Ok(Json(VoiceUploadResponse {
        user_id: user.user_id,
        voice_id,
        message: "Preselected voice set successfully.",
    }))
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub user_id: String,
    pub text: String,
}

/// Extract plain text from a .txt, .docx or .pdf upload.
pub async fn upload_document(
    user: AuthUser,
    multipart: Multipart,
) -> ApiResult<Json<DocumentResponse>> {
    let mut form = UploadForm::read(multipart).await?;
    let file = form.require_file("file", "No file provided")?;

    let text = extract_text(&file.file_name, &file.data).await?;
    if text.is_empty() {
        return Err(ApiError::bad_request("Could not extract text from the document."));
    }

    Ok(Json(DocumentResponse {
        user_id: user.user_id,
        text,
    }))
}
