//! Lip-sync jobs at `lipsync_jobs/{job_id}`.
//!
//! Jobs are top-level so the background poller can scan active jobs across
//! all users with a single query.

use chrono::Utc;
use tracing::{info, warn};

use luga_models::{LipSyncJob, LipSyncStatus};

use crate::client::{FirestoreClient, Precondition};
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{Document, Fields, StructuredQuery, ToFirestoreValue};

pub const LIPSYNC_JOBS: &str = "lipsync_jobs";

/// Upper bound on jobs read for one user.
const MAX_USER_JOBS: u32 = 500;

#[derive(Clone)]
pub struct LipSyncJobRepository {
    client: FirestoreClient,
}

impl LipSyncJobRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub async fn create(&self, job: &LipSyncJob) -> FirestoreResult<()> {
        self.client
            .create_document(LIPSYNC_JOBS, &job.job_id, job_to_fields(job).into_inner())
            .await?;
        info!(job_id = %job.job_id, user_id = %job.user_id, status = %job.status, "Created lip-sync job");
        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> FirestoreResult<Option<LipSyncJob>> {
        let doc = self.client.get_document(LIPSYNC_JOBS, job_id).await?;
        doc.map(|d| document_to_job(&d)).transpose()
    }

    /// Write `job` back, conditioned on the revision it was read at.
    ///
    /// Fails with `PreconditionFailed` when another writer got there first and
    /// with `NotFound` when the job was deleted. Never recreates a deleted job.
    /// On success `job.update_time` moves to the new revision.
    pub async fn update(&self, job: &mut LipSyncJob) -> FirestoreResult<()> {
        let precondition = match job.update_time.as_deref() {
            Some(ts) => Precondition::UpdateTime(ts),
            None => Precondition::Exists,
        };
        let fields = job_to_fields(job);
        let mask = fields.mask();
        let doc = self
            .client
            .update_document_if(LIPSYNC_JOBS, &job.job_id, fields.into_inner(), mask, precondition)
            .await?;
        job.update_time = doc.update_time;
        Ok(())
    }

    /// Most recent job for one of the user's videos.
    pub async fn latest_for_video(&self, user_id: &str, video_id: &str) -> FirestoreResult<Option<LipSyncJob>> {
        let query = StructuredQuery::collection(LIPSYNC_JOBS)
            .where_eq("user_id", user_id)
            .where_eq("video_id", video_id)
            .limit(MAX_USER_JOBS);
        let mut jobs = self.parse_all(&self.client.run_query("", query).await?);
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs.into_iter().next())
    }

    /// One page of the user's jobs, newest first, plus the total count.
    pub async fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
        skip: usize,
    ) -> FirestoreResult<(Vec<LipSyncJob>, usize)> {
        let query = StructuredQuery::collection(LIPSYNC_JOBS)
            .where_eq("user_id", user_id)
            .limit(MAX_USER_JOBS);
        let mut jobs = self.parse_all(&self.client.run_query("", query).await?);
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = jobs.len();
        let page = jobs.into_iter().skip(skip).take(limit).collect();
        Ok((page, total))
    }

    /// Jobs of this user that still occupy a concurrency slot.
    pub async fn count_active(&self, user_id: &str) -> FirestoreResult<usize> {
        let query = StructuredQuery::collection(LIPSYNC_JOBS)
            .where_eq("user_id", user_id)
            .where_in("status", active_statuses())
            .limit(MAX_USER_JOBS);
        Ok(self.client.run_query("", query).await?.len())
    }

    /// Non-terminal jobs across all users, least recently polled first.
    ///
    /// Never-polled jobs carry a null `last_polled_at` and sort ahead of the rest.
    pub async fn list_active(&self, limit: u32) -> FirestoreResult<Vec<LipSyncJob>> {
        let query = StructuredQuery::collection(LIPSYNC_JOBS)
            .where_in("status", active_statuses())
            .order_by_asc("last_polled_at")
            .order_by_asc("created_at")
            .limit(limit);
        Ok(self.parse_all(&self.client.run_query("", query).await?))
    }

    /// Remove every job that references the video. Returns how many were deleted.
    pub async fn delete_for_video(&self, user_id: &str, video_id: &str) -> FirestoreResult<usize> {
        let query = StructuredQuery::collection(LIPSYNC_JOBS)
            .where_eq("user_id", user_id)
            .where_eq("video_id", video_id)
            .limit(MAX_USER_JOBS);
        let docs = self.client.run_query("", query).await?;

        let mut deleted = 0;
        for doc in &docs {
            if let Some(id) = doc.id() {
                self.client.delete_document(LIPSYNC_JOBS, id).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn parse_all(&self, docs: &[Document]) -> Vec<LipSyncJob> {
        docs.iter()
            .filter_map(|doc| match document_to_job(doc) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!(doc = ?doc.name, error = %e, "Skipping malformed lip-sync job");
                    None
                }
            })
            .collect()
    }
}

fn active_statuses() -> Vec<crate::types::Value> {
    LipSyncStatus::ACTIVE
        .iter()
        .map(|s| s.as_str().to_firestore_value())
        .collect()
}

fn job_to_fields(job: &LipSyncJob) -> Fields {
    Fields::new()
        .set("user_id", job.user_id.as_str())
        .set("video_id", job.video_id.as_str())
        .set("audio_id", job.audio_id.as_str())
        .set("video_url", job.video_url.as_str())
        .set("audio_url", job.audio_url.as_str())
        .set("model", job.model.as_str())
        .set("output_format", job.output_format.as_str())
        .set("status", job.status.as_str())
        .set("result_video_url", job.result_video_url.clone())
        .set("output_duration_seconds", job.output_duration_seconds)
        .set("error", job.error.clone())
        .set("sync_result", job.sync_result.clone())
        .set("quota_charged_seconds", job.quota_charged_seconds)
        .set("created_at", job.created_at)
        .set("updated_at", job.updated_at)
        .set("last_polled_at", job.last_polled_at)
}

fn document_to_job(doc: &Document) -> FirestoreResult<LipSyncJob> {
    let job_id = doc
        .id()
        .ok_or_else(|| FirestoreError::invalid_response("lip-sync job has no name"))?;
    let now = Utc::now();
    let status: String = doc.require("status")?;

    Ok(LipSyncJob {
        job_id: job_id.to_string(),
        user_id: doc.require("user_id")?,
        video_id: doc.require("video_id")?,
        audio_id: doc.get("audio_id").unwrap_or_default(),
        video_url: doc.get("video_url").unwrap_or_default(),
        audio_url: doc.get("audio_url").unwrap_or_default(),
        model: doc.get("model").unwrap_or_default(),
        output_format: doc.get("output_format").unwrap_or_default(),
        status: LipSyncStatus::from_remote(&status),
        result_video_url: doc.get("result_video_url"),
        output_duration_seconds: doc.get("output_duration_seconds"),
        error: doc.get("error"),
        sync_result: doc.get("sync_result").unwrap_or(serde_json::Value::Null),
        quota_charged_seconds: doc.get("quota_charged_seconds").unwrap_or(0),
        created_at: doc.get("created_at").unwrap_or(now),
        updated_at: doc.get("updated_at").unwrap_or(now),
        last_polled_at: doc.get("last_polled_at"),
        update_time: doc.update_time.clone(),
    })
}
