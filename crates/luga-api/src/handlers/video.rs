//! Media upload and lip-sync endpoints under `/api/video`.

use std::io::Cursor;

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Rgb};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use luga_clients::sync::WEBHOOK_SECRET_HEADER;
use luga_models::lipsync::{DEFAULT_LIPSYNC_MODEL, DEFAULT_OUTPUT_FORMAT};
use luga_models::{AudioRecord, AudioSource, LipSyncJob, LipSyncStatus, MediaKind, StoredObject, VideoRecord};
use luga_storage::{content_type_for, object_key, validate_upload};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::handlers::form::{UploadForm, UploadedFile};
use crate::security::{is_valid_record_id, validate_webhook_url};
use crate::services::{SubmitJob, UpdateSource};
use crate::state::AppState;

const MAX_JOBS_PAGE: usize = 100;
const DEFAULT_JOBS_PAGE: usize = 10;
const MAX_PLACEHOLDER_SIDE: u32 = 2000;
const PLACEHOLDER_GREY: Rgb<u8> = Rgb([204, 204, 204]);

fn require_id(id: &str, what: &str) -> ApiResult<()> {
    if is_valid_record_id(id) {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!("Invalid {} ID", what)))
    }
}

/// Validate and store an uploaded media file under `{folder}/{user_id}/`.
async fn store_upload(
    state: &AppState,
    user_id: &str,
    file: UploadedFile,
    folder: &str,
    kind: MediaKind,
) -> ApiResult<(String, StoredObject)> {
    validate_upload(&file.file_name, file.content_type.as_deref(), file.data.len(), kind)?;

    let key = object_key(folder, user_id, &file.file_name);
    let content_type = file
        .content_type
        .clone()
        .unwrap_or_else(|| content_type_for(&file.file_name).to_string());
    let size = file.data.len();
    let stored = state.store.upload(&key, file.data, &content_type, kind).await?;

    info!(user_id = %user_id, key = %stored.key, size, kind = kind.as_str(), "Stored upload");
    Ok((file.file_name, stored))
}

#[derive(Serialize)]
pub struct AudioUploadResponse {
    pub user_id: String,
    pub audio_id: String,
    pub audio_url: String,
    pub message: &'static str,
}

pub async fn upload_audio(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> ApiResult<Json<AudioUploadResponse>> {
    let mut form = UploadForm::read(multipart).await?;
    let file = form.require_file("audio", "No audio file provided")?;

    let (file_name, stored) = store_upload(&state, &user.user_id, file, "audio", MediaKind::Audio).await?;
    let record = AudioRecord::new(&user.user_id, file_name, stored, AudioSource::Upload);
    state.media(&user.user_id).create_audio(&record).await?;

    Ok(Json(AudioUploadResponse {
        user_id: user.user_id,
        audio_id: record.id,
        audio_url: record.url,
        message: "Audio uploaded successfully",
    }))
}

/// Audio files the user uploaded for lip-sync.
pub async fn get_audio(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<AudioRecord>>> {
    Ok(Json(
        state
            .media(&user.user_id)
            .list_audio(Some(AudioSource::Upload))
            .await?,
    ))
}

#[derive(Serialize)]
pub struct VideoUploadResponse {
    pub user_id: String,
    pub video_id: String,
    pub video_url: String,
    pub message: &'static str,
}

pub async fn upload_video(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> ApiResult<Json<VideoUploadResponse>> {
    let mut form = UploadForm::read(multipart).await?;
    let file = form.require_file("video", "No video file provided")?;

    let (file_name, stored) = store_upload(&state, &user.user_id, file, "video", MediaKind::Video).await?;
    let record = VideoRecord::new(&user.user_id, file_name, stored);
    state.media(&user.user_id).create_video(&record).await?;

    Ok(Json(VideoUploadResponse {
        user_id: user.user_id,
        video_id: record.id,
        video_url: record.url,
        message: "Video uploaded successfully",
    }))
}

fn default_model() -> String {
    DEFAULT_LIPSYNC_MODEL.to_string()
}

fn default_output_format() -> String {
    DEFAULT_OUTPUT_FORMAT.to_string()
}

#[derive(Deserialize)]
pub struct SyncAudioRequest {
    pub audio_id: String,
    pub video_id: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Serialize)]
pub struct SyncAudioResponse {
    pub user_id: String,
    pub video_id: String,
    pub job_id: String,
    pub status: LipSyncStatus,
    pub sync_result: Value,
    pub message: &'static str,
}

/// Submit a lip-sync job for an uploaded video and audio pair.
pub async fn sync_audio(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<SyncAudioRequest>,
) -> ApiResult<Json<SyncAudioResponse>> {
    require_id(&request.video_id, "video")?;
    require_id(&request.audio_id, "audio")?;

    let webhook_url = request
        .webhook_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(validate_webhook_url)
        .transpose()
        .map_err(ApiError::bad_request)?;

    let media = state.media(&user.user_id);
    let video = media
        .get_video(&request.video_id)
        .await?
        .ok_or_else(|| ApiError::not_found("No video found for this user and video ID"))?;
    let audio = media
        .get_audio(&request.audio_id)
        .await?
        .ok_or_else(|| ApiError::not_found("No audio found for this user and audio ID"))?;

    let job = state
        .lipsync
        .submit(SubmitJob {
            user_id: &user.user_id,
            video: &video,
            audio: &audio,
            model: request.model,
            output_format: request.output_format,
            webhook_url,
        })
        .await?;

    Ok(Json(SyncAudioResponse {
        user_id: user.user_id,
        video_id: job.video_id,
        job_id: job.job_id,
        status: job.status,
        sync_result: job.sync_result,
        message: "Audio sync job submitted successfully",
    }))
}

/// Stored view of a lip-sync job.
#[derive(Serialize)]
pub struct JobStatusResponse {
    pub user_id: String,
    pub video_id: String,
    pub job_id: String,
    pub status: LipSyncStatus,
    pub result_video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub quota_charged_seconds: i64,
    pub job_result: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<LipSyncJob> for JobStatusResponse {
    fn from(job: LipSyncJob) -> Self {
        Self {
            user_id: job.user_id,
            video_id: job.video_id,
            job_id: job.job_id,
            status: job.status,
            result_video_url: job.result_video_url,
            error: job.error,
            quota_charged_seconds: job.quota_charged_seconds,
            job_result: job.sync_result,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Latest job for a video, refreshed from Sync.so while it is running.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    user: AuthUser,
) -> ApiResult<Json<JobStatusResponse>> {
    require_id(&video_id, "video")?;

    let job = state
        .lipsync_jobs
        .latest_for_video(&user.user_id, &video_id)
        .await?
        .ok_or_else(|| ApiError::not_found("No sync record found for this user and video ID"))?;

    let job = state.lipsync.refresh(job, UpdateSource::Request).await?;
    Ok(Json(job.into()))
}

#[derive(Deserialize)]
pub struct JobsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub skip: Option<usize>,
}

/// One page of the user's jobs, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
    user: AuthUser,
) -> ApiResult<Json<Vec<JobStatusResponse>>> {
    let limit = query.limit.unwrap_or(DEFAULT_JOBS_PAGE).clamp(1, MAX_JOBS_PAGE);
    let skip = query.skip.unwrap_or(0);

    let (jobs, total) = state.lipsync_jobs.list_for_user(&user.user_id, limit, skip).await?;
    debug!(user_id = %user.user_id, total, limit, skip, "Listed lip-sync jobs");
    Ok(Json(jobs.into_iter().map(JobStatusResponse::from).collect()))
}

#[derive(Serialize)]
pub struct DeleteJobResponse {
    pub message: &'static str,
    pub deleted_jobs: usize,
}

/// Remove a video's job records and the video record itself.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    user: AuthUser,
) -> ApiResult<Json<DeleteJobResponse>> {
    require_id(&video_id, "video")?;

    let deleted_jobs = state
        .lipsync_jobs
        .delete_for_video(&user.user_id, &video_id)
        .await?;
    if deleted_jobs == 0 {
        return Err(ApiError::not_found(
            "No job found with the specified user ID and video ID",
        ));
    }

    let media = state.media(&user.user_id);
    if let Some(video) = media.get_video(&video_id).await? {
        if let Err(e) = state.store.delete(&video.storage_key, MediaKind::Video).await {
            warn!(video_id = %video_id, error = %e, "Failed to delete video object");
        }
        media.delete_video(&video_id).await?;
    }

    info!(user_id = %user.user_id, video_id = %video_id, deleted_jobs, "Deleted lip-sync job");
    Ok(Json(DeleteJobResponse {
        message: "Job deleted successfully",
        deleted_jobs,
    }))
}

#[derive(Deserialize)]
pub struct WebhookQuery {
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
}

/// Sync.so completion callback.
///
/// The shared secret comes from the `x-sync-webhook-secret` header or a
/// `secret` query parameter embedded in the registered callback URL.
pub async fn sync_webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let provided = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(query.secret.as_deref());
    state
        .providers
        .sync
        .verify_webhook(provided)
        .map_err(|_| ApiError::unauthorized("Invalid webhook secret"))?;

    let raw: Value =
        serde_json::from_slice(&body).map_err(|_| ApiError::bad_request("Invalid payload"))?;
    let job = state.lipsync.apply_webhook(raw).await?;

    Ok(Json(WebhookAck {
        status: if job.is_some() { "updated" } else { "ignored" },
    }))
}

/// Solid grey PNG of the requested size, clamped to 1..=2000 per side.
pub async fn placeholder(Path((width, height)): Path<(u32, u32)>) -> ApiResult<Response> {
    let width = width.clamp(1, MAX_PLACEHOLDER_SIDE);
    let height = height.clamp(1, MAX_PLACEHOLDER_SIDE);

    let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, PLACEHOLDER_GREY));
    let mut png = Cursor::new(Vec::new());
    image
        .write_to(&mut png, ImageOutputFormat::Png)
        .map_err(|e| ApiError::internal(format!("Failed to render placeholder: {}", e)))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "public, max-age=86400"),
        ],
        png.into_inner(),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_placeholder_is_clamped_png() {
        let response = placeholder(Path((5000, 0))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let decoded = image::load_from_memory(&body).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (2000, 1));
    }

    #[test]
    fn test_sync_request_defaults() {
        let request: SyncAudioRequest =
            serde_json::from_value(serde_json::json!({"audio_id": "a1", "video_id": "v1"})).unwrap();
        assert_eq!(request.model, "lipsync-1.7.1");
        assert_eq!(request.output_format, "mp4");
        assert!(request.webhook_url.is_none());
    }
}
