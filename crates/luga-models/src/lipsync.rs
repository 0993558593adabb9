//! Lip-sync jobs mirrored from Sync.so.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIPSYNC_MODEL: &str = "lipsync-1.7.1";
pub const DEFAULT_OUTPUT_FORMAT: &str = "mp4";

/// Lip-sync job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LipSyncStatus {
    /// Accepted by Sync.so, not started
    #[default]
    Pending,
    /// Being rendered
    Processing,
    /// Output video is available
    Completed,
    /// Rendering failed
    Failed,
    /// Input rejected by Sync.so
    Rejected,
    /// Cancelled before completion
    Canceled,
}

impl LipSyncStatus {
    /// Parse a Sync.so status string. Unknown values are treated as in-progress.
    pub fn from_remote(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "PENDING" | "QUEUED" => LipSyncStatus::Pending,
            "PROCESSING" | "RUNNING" => LipSyncStatus::Processing,
            "COMPLETED" | "COMPLETE" => LipSyncStatus::Completed,
            "FAILED" => LipSyncStatus::Failed,
            "REJECTED" => LipSyncStatus::Rejected,
            "CANCELED" | "CANCELLED" => LipSyncStatus::Canceled,
            _ => LipSyncStatus::Processing,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LipSyncStatus::Pending => "PENDING",
            LipSyncStatus::Processing => "PROCESSING",
            LipSyncStatus::Completed => "COMPLETED",
            LipSyncStatus::Failed => "FAILED",
            LipSyncStatus::Rejected => "REJECTED",
            LipSyncStatus::Canceled => "CANCELED",
        }
    }

    /// No further updates are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LipSyncStatus::Completed
                | LipSyncStatus::Failed
                | LipSyncStatus::Rejected
                | LipSyncStatus::Canceled
        )
    }

    /// Terminal states are sticky; everything else may move anywhere.
    pub fn can_transition_to(&self, next: LipSyncStatus) -> bool {
        !self.is_terminal() || *self == next
    }

    /// Statuses that still occupy a concurrent-job slot.
    pub const ACTIVE: [LipSyncStatus; 2] = [LipSyncStatus::Pending, LipSyncStatus::Processing];
}

impl std::fmt::Display for LipSyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized view of a Sync.so job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub status: LipSyncStatus,
    pub output_url: Option<String>,
    /// Length of the rendered video in seconds.
    pub output_duration: Option<f64>,
    pub error: Option<String>,
    /// Raw response body.
    pub raw: serde_json::Value,
}

/// Stored lip-sync job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LipSyncJob {
    pub job_id: String,
    pub user_id: String,
    pub video_id: String,
    pub audio_id: String,
    pub video_url: String,
    pub audio_url: String,
    pub model: String,
    pub output_format: String,
    pub status: LipSyncStatus,
    pub result_video_url: Option<String>,
    pub output_duration_seconds: Option<f64>,
    pub error: Option<String>,
    /// Latest raw payload from Sync.so.
    pub sync_result: serde_json::Value,
    /// Video seconds charged for this job. Zero until the job completes.
    pub quota_charged_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Store revision this copy was read at. Writes are conditioned on it.
    #[serde(skip)]
    pub update_time: Option<String>,
}

/// What changed when a snapshot was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTransition {
    pub from: LipSyncStatus,
    pub to: LipSyncStatus,
    /// The job reached `Completed` with this update.
    pub newly_completed: bool,
}

impl JobTransition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

impl LipSyncJob {
    /// Record a freshly submitted job.
    #[allow(clippy::too_many_arguments)]
    pub fn submitted(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        video_id: impl Into<String>,
        audio_id: impl Into<String>,
        video_url: impl Into<String>,
        audio_url: impl Into<String>,
        model: impl Into<String>,
        output_format: impl Into<String>,
        initial: LipSyncStatus,
        sync_result: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            user_id: user_id.into(),
            video_id: video_id.into(),
            audio_id: audio_id.into(),
            video_url: video_url.into(),
            audio_url: audio_url.into(),
            model: model.into(),
            output_format: output_format.into(),
            status: initial,
            result_video_url: None,
            output_duration_seconds: None,
            error: None,
            sync_result,
            quota_charged_seconds: 0,
            created_at: now,
            updated_at: now,
            last_polled_at: None,
            update_time: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a remote snapshot. Terminal jobs ignore status changes.
    pub fn apply_snapshot(&mut self, snapshot: &JobSnapshot, now: DateTime<Utc>) -> JobTransition {
        let from = self.status;
        self.last_polled_at = Some(now);

        if !from.can_transition_to(snapshot.status) {
            return JobTransition {
                from,
                to: from,
                newly_completed: false,
            };
        }

        self.status = snapshot.status;
        self.sync_result = snapshot.raw.clone();
        if let Some(url) = &snapshot.output_url {
            self.result_video_url = Some(url.clone());
        }
        if let Some(duration) = snapshot.output_duration {
            self.output_duration_seconds = Some(duration);
        }
        if snapshot.error.is_some() {
            self.error = snapshot.error.clone();
        }
        self.updated_at = now;

        JobTransition {
            from,
            to: self.status,
            newly_completed: from != LipSyncStatus::Completed
                && self.status == LipSyncStatus::Completed,
        }
    }

    /// Fail a job locally (e.g. after it stalled too long).
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = LipSyncStatus::Failed;
        self.error = Some(reason.into());
        self.updated_at = now;
        true
    }

    /// Video seconds owed for a completed job that has not been charged yet.
    ///
    /// Falls back to one second when Sync.so did not report a duration.
    pub fn billable_seconds(&self) -> i64 {
        if self.status != LipSyncStatus::Completed || self.quota_charged_seconds > 0 {
            return 0;
        }
        match self.output_duration_seconds {
            Some(d) if d > 0.0 => d.ceil() as i64,
            _ => 1,
        }
    }

    /// Non-terminal job older than `max_age_secs`.
    pub fn is_overdue(&self, now: DateTime<Utc>, max_age_secs: i64) -> bool {
        !self.is_terminal() && (now - self.created_at).num_seconds() > max_age_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job() -> LipSyncJob {
        LipSyncJob::submitted(
            "job-1",
            "u1",
            "v1",
            "a1",
            "https://cdn/v.mp4",
            "https://cdn/a.mp3",
            DEFAULT_LIPSYNC_MODEL,
            DEFAULT_OUTPUT_FORMAT,
            LipSyncStatus::Pending,
            serde_json::json!({"id": "job-1"}),
        )
    }

    fn snapshot(status: LipSyncStatus) -> JobSnapshot {
        JobSnapshot {
            id: "job-1".into(),
            status,
            output_url: (status == LipSyncStatus::Completed).then(|| "https://out/x.mp4".into()),
            output_duration: (status == LipSyncStatus::Completed).then_some(12.2),
            error: None,
            raw: serde_json::json!({"status": status.as_str()}),
        }
    }

    #[test]
    fn test_from_remote() {
        assert_eq!(LipSyncStatus::from_remote("PENDING"), LipSyncStatus::Pending);
        assert_eq!(LipSyncStatus::from_remote("processing"), LipSyncStatus::Processing);
        assert_eq!(LipSyncStatus::from_remote("COMPLETED"), LipSyncStatus::Completed);
        assert_eq!(LipSyncStatus::from_remote("CANCELLED"), LipSyncStatus::Canceled);
        assert_eq!(LipSyncStatus::from_remote("REJECTED"), LipSyncStatus::Rejected);
        assert_eq!(LipSyncStatus::from_remote("WHATEVER"), LipSyncStatus::Processing);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!LipSyncStatus::Pending.is_terminal());
        assert!(!LipSyncStatus::Processing.is_terminal());
        assert!(LipSyncStatus::Completed.is_terminal());
        assert!(LipSyncStatus::Failed.is_terminal());
        assert!(LipSyncStatus::Rejected.is_terminal());
        assert!(LipSyncStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_apply_snapshot_progression() {
        let mut job = job();
        let now = Utc::now();

        let t = job.apply_snapshot(&snapshot(LipSyncStatus::Processing), now);
        assert!(t.changed());
        assert!(!t.newly_completed);

        let t = job.apply_snapshot(&snapshot(LipSyncStatus::Completed), now);
        assert!(t.newly_completed);
        assert_eq!(job.result_video_url.as_deref(), Some("https://out/x.mp4"));
        assert_eq!(job.billable_seconds(), 13);

        // Repeated completion is not "new".
        let t = job.apply_snapshot(&snapshot(LipSyncStatus::Completed), now);
        assert!(!t.newly_completed);
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut job = job();
        let now = Utc::now();
        job.apply_snapshot(&snapshot(LipSyncStatus::Failed), now);
        let t = job.apply_snapshot(&snapshot(LipSyncStatus::Processing), now);
        assert!(!t.changed());
        assert_eq!(job.status, LipSyncStatus::Failed);
    }

    #[test]
    fn test_billable_seconds_only_once() {
        let mut job = job();
        assert_eq!(job.billable_seconds(), 0);

        job.apply_snapshot(&snapshot(LipSyncStatus::Completed), Utc::now());
        assert_eq!(job.billable_seconds(), 13);
        job.quota_charged_seconds = 13;
        assert_eq!(job.billable_seconds(), 0);
    }

    #[test]
    fn test_billable_seconds_without_duration() {
        let mut job = job();
        let mut snap = snapshot(LipSyncStatus::Completed);
        snap.output_duration = None;
        job.apply_snapshot(&snap, Utc::now());
        assert_eq!(job.billable_seconds(), 1);
    }

    #[test]
    fn test_overdue_and_fail() {
        let mut job = job();
        let later = job.created_at + Duration::hours(3);
        assert!(job.is_overdue(later, 7200));
        assert!(job.fail("timed out", later));
        assert_eq!(job.status, LipSyncStatus::Failed);
        assert!(!job.is_overdue(later, 7200));
        assert!(!job.fail("again", later));
    }
}
