//! Voice cloning endpoints under `/api/clone`.

use axum::extract::{Multipart, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use luga_clients::VoiceSample;
use luga_models::{AudioSource, ClonedVoice, MediaKind};
use luga_storage::MAX_UPLOAD_BYTES;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::handlers::form::UploadForm;
use crate::handlers::voice::{synthesize, SpeechTarget};
use crate::security::{sanitize_title, MAX_TTS_TEXT_LENGTH};
use crate::services::ChargeSummary;
use crate::state::AppState;

const DEFAULT_VOICE_NAME: &str = "Cloned Voice";
const DEFAULT_PREVIEW_TEXT: &str = "Hello, this is a preview of your cloned voice.";

const PREVIEW_TARGET: SpeechTarget = SpeechTarget {
    folder: "previews",
    source: AudioSource::Preview,
};

#[derive(Serialize)]
pub struct CloneVoiceResponse {
    pub voice_id: String,
    pub name: String,
    pub message: &'static str,
}

/// Clone a voice from one or more audio samples.
pub async fn clone_voice(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> ApiResult<Json<CloneVoiceResponse>> {
    let mut form = UploadForm::read(multipart).await?;
    let files = form.take_files("files");
    if files.is_empty() {
        return Err(ApiError::bad_request("No files provided"));
    }

    let mut samples = Vec::with_capacity(files.len());
    for file in files {
        let audio_type = file
            .content_type
            .as_deref()
            .filter(|ct| ct.to_ascii_lowercase().starts_with(MediaKind::Audio.mime_prefix()));
        let Some(content_type) = audio_type.map(str::to_string) else {
            return Err(ApiError::bad_request(format!(
                "Invalid file type: {}. Only audio files are allowed.",
                file.content_type.as_deref().unwrap_or("unknown")
            )));
        };
        if file.data.is_empty() || file.data.len() > MAX_UPLOAD_BYTES {
            return Err(ApiError::bad_request(format!("Invalid file size: {}", file.file_name)));
        }
        samples.push(VoiceSample {
            file_name: file.file_name,
            content_type,
            data: file.data,
        });
    }

    let name = form
        .text("voice_name")
        .map(sanitize_title)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_VOICE_NAME.to_string());
    let description = form.text("description").map(str::to_string);

    let voice_id = state
        .providers
        .elevenlabs
        .add_voice(&name, description.as_deref().unwrap_or_default(), samples)
        .await?;

    let voice = ClonedVoice {
        voice_id,
        user_id: user.user_id.clone(),
        name,
        description,
        created_at: Utc::now(),
    };
    state.media(&user.user_id).create_voice(&voice).await?;

    info!(user_id = %user.user_id, voice_id = %voice.voice_id, "Cloned voice");
    Ok(Json(CloneVoiceResponse {
        voice_id: voice.voice_id,
        name: voice.name,
        message: "Voice cloned successfully",
    }))
}

/// Voices this user has cloned.
pub async fn list_cloned_voices(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<ClonedVoice>>> {
    Ok(Json(state.media(&user.user_id).list_voices().await?))
}

#[derive(Deserialize)]
pub struct PreviewRequest {
    #[serde(default)]
    pub voice_id: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Serialize)]
pub struct PreviewResponse {
    pub preview_url: String,
    pub audio_id: String,
    pub message: &'static str,
    #[serde(flatten)]
    pub quota: ChargeSummary,
}

pub async fn generate_preview(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<PreviewRequest>,
) -> ApiResult<Json<PreviewResponse>> {
    let voice_id = request.voice_id.trim();
    if voice_id.is_empty() {
        return Err(ApiError::bad_request("Voice ID is required"));
    }

    let text = request
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_PREVIEW_TEXT);
    if text.chars().count() > MAX_TTS_TEXT_LENGTH {
        return Err(ApiError::unprocessable(format!(
            "Text is too long (max {} characters)",
            MAX_TTS_TEXT_LENGTH
        )));
    }

    let (audio, quota) = synthesize(&state, &user.user_id, voice_id, text, PREVIEW_TARGET).await?;
    Ok(Json(PreviewResponse {
        preview_url: audio.url,
        audio_id: audio.id,
        message: "Preview generated successfully",
        quota,
    }))
}
