//! Lip-sync job lifecycle: submission, status refresh and completion billing.
//!
//! Every path that learns about a job's progress (the status endpoint, the
//! Sync.so webhook and the background poller) goes through [`LipSyncService::settle`],
//! so the video-seconds charge is applied at most once per job.

use chrono::Utc;
use luga_clients::sync::snapshot_from_json;
use luga_clients::{GenerateRequest, SyncClient};
use luga_firestore::{FirestoreError, LipSyncJobRepository};
use luga_models::{AudioRecord, JobSnapshot, JobTransition, LipSyncJob, QuotaKind, VideoRecord};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::ApiResult;
use crate::metrics;
use crate::services::QuotaService;

/// Conditional writes attempted before a contended update is left to the next observer.
const MAX_SETTLE_ATTEMPTS: u32 = 3;

/// Who observed a job update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Request,
    Webhook,
    Poller,
}

impl UpdateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateSource::Request => "request",
            UpdateSource::Webhook => "webhook",
            UpdateSource::Poller => "poller",
        }
    }
}

/// Parameters of a new lip-sync job.
#[derive(Debug, Clone)]
pub struct SubmitJob<'a> {
    pub user_id: &'a str,
    pub video: &'a VideoRecord,
    pub audio: &'a AudioRecord,
    pub model: String,
    pub output_format: String,
    pub webhook_url: Option<String>,
}

#[derive(Clone)]
pub struct LipSyncService {
    sync: SyncClient,
    jobs: LipSyncJobRepository,
    quota: QuotaService,
}

impl LipSyncService {
    pub fn new(sync: SyncClient, jobs: LipSyncJobRepository, quota: QuotaService) -> Self {
        Self { sync, jobs, quota }
    }

    /// Gate on quota, submit to Sync.so and persist the job.
    pub async fn submit(&self, request: SubmitJob<'_>) -> ApiResult<LipSyncJob> {
        let active = self.jobs.count_active(request.user_id).await?;
        self.quota.ensure_job_slot(request.user_id, active).await?;

        let snapshot = self
            .sync
            .generate(&GenerateRequest {
                video_url: request.video.url.clone(),
                audio_url: request.audio.url.clone(),
                model: request.model.clone(),
                output_format: request.output_format.clone(),
                webhook_url: request.webhook_url,
            })
            .await?;

        let job = LipSyncJob::submitted(
            snapshot.id,
            request.user_id,
            &request.video.id,
            &request.audio.id,
            &request.video.url,
            &request.audio.url,
            &request.model,
            &request.output_format,
            snapshot.status,
            snapshot.raw,
        );
        self.jobs.create(&job).await?;
        metrics::record_lipsync_submitted(&job.model);

        info!(
            user_id = %job.user_id,
            job_id = %job.job_id,
            video_id = %job.video_id,
            model = %job.model,
            "Submitted lip-sync job"
        );
        Ok(job)
    }

    /// Bring a stored job up to date with Sync.so.
    ///
    /// Terminal jobs are not fetched again, but a completed job that still
    /// owes its charge is settled.
    pub async fn refresh(&self, job: LipSyncJob, source: UpdateSource) -> ApiResult<LipSyncJob> {
        if job.is_terminal() {
            return self.settle(job, None, source).await;
        }
        let snapshot = self.sync.get_job(&job.job_id).await?;
        self.settle(job, Some(&snapshot), source).await
    }

    /// Apply a Sync.so callback body. Unknown job ids are ignored.
    pub async fn apply_webhook(&self, raw: Value) -> ApiResult<Option<LipSyncJob>> {
        let snapshot = snapshot_from_json(raw)?;
        let Some(job) = self.jobs.get(&snapshot.id).await? else {
            warn!(job_id = %snapshot.id, "Webhook for unknown lip-sync job");
            return Ok(None);
        };
        self.settle(job, Some(&snapshot), UpdateSource::Webhook).await.map(Some)
    }

    /// Fail a job locally. Returns `None` when it was already terminal, or
    /// when it changed or disappeared since it was read.
    pub async fn fail(&self, mut job: LipSyncJob, reason: &str) -> ApiResult<Option<LipSyncJob>> {
        if !job.fail(reason, Utc::now()) {
            return Ok(None);
        }
        match self.jobs.update(&mut job).await {
            Ok(()) => {}
            Err(e) if e.is_precondition_failed() || matches!(e, FirestoreError::NotFound(_)) => {
                debug!(job_id = %job.job_id, "Lip-sync job changed before it could be failed");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }
        metrics::record_lipsync_finished(job.status, UpdateSource::Poller.as_str());
        warn!(job_id = %job.job_id, user_id = %job.user_id, reason = %reason, "Failed lip-sync job");
        Ok(Some(job))
    }

    /// Apply what Sync.so reported and charge a newly completed job.
    ///
    /// The job is written back conditioned on the revision it was read at, and
    /// the charge marker travels in that write. When another observer wrote
    /// first, the job is re-read and the update re-applied, so only the writer
    /// that actually moved `quota_charged_seconds` off zero deducts quota.
    async fn settle(
        &self,
        job: LipSyncJob,
        snapshot: Option<&JobSnapshot>,
        source: UpdateSource,
    ) -> ApiResult<LipSyncJob> {
        let mut current = job;

        for attempt in 1..=MAX_SETTLE_ATTEMPTS {
            let mut next = current.clone();
            // A terminal job keeps its final state; late snapshots are ignored.
            let observed = snapshot.filter(|_| !next.is_terminal());
            let transition = observed.map(|s| next.apply_snapshot(s, Utc::now()));

            let owed = next.billable_seconds();
            if owed > 0 {
                next.quota_charged_seconds = owed;
            }
            if observed.is_none() && owed == 0 {
                return Ok(next);
            }

            match self.jobs.update(&mut next).await {
                Ok(()) => {}
                Err(e) if e.is_precondition_failed() => {
                    debug!(
                        job_id = %current.job_id,
                        attempt,
                        source = source.as_str(),
                        "Lip-sync job changed concurrently, re-reading"
                    );
                    match self.jobs.get(&current.job_id).await? {
                        Some(fresh) => {
                            current = fresh;
                            continue;
                        }
                        None => {
                            info!(job_id = %current.job_id, "Lip-sync job deleted while settling");
                            return Ok(current);
                        }
                    }
                }
                Err(FirestoreError::NotFound(_)) => {
                    info!(job_id = %current.job_id, "Lip-sync job deleted while settling");
                    return Ok(current);
                }
                Err(e) => return Err(e.into()),
            }

            if let Some(transition) = transition.filter(JobTransition::changed) {
                info!(
                    job_id = %next.job_id,
                    from = %transition.from,
                    to = %transition.to,
                    source = source.as_str(),
                    "Lip-sync job status changed"
                );
                if transition.to.is_terminal() {
                    metrics::record_lipsync_finished(transition.to, source.as_str());
                }
            }

            if owed > 0 {
                self.charge_completed(&next, owed).await;
            }
            return Ok(next);
        }

        warn!(
            job_id = %current.job_id,
            attempts = MAX_SETTLE_ATTEMPTS,
            source = source.as_str(),
            "Giving up on contended lip-sync update"
        );
        Ok(current)
    }

    async fn charge_completed(&self, job: &LipSyncJob, seconds: i64) {
        match self.quota.charge(&job.user_id, None, QuotaKind::Video, seconds).await {
            Ok(charge) => info!(
                job_id = %job.job_id,
                user_id = %job.user_id,
                seconds,
                remaining = charge.after,
                "Charged video quota for lip-sync job"
            ),
            Err(e) => error!(
                job_id = %job.job_id,
                user_id = %job.user_id,
                seconds,
                error = %e,
                "Failed to charge video quota"
            ),
        }
    }
}
