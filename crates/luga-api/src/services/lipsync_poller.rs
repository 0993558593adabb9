//! Background refresh of lip-sync jobs that are still running.
//!
//! Each tick loads active jobs across all users, refreshes the ones not
//! polled recently, and fails the ones that have been running too long.

use std::time::Duration;

use chrono::Utc;
use luga_firestore::LipSyncJobRepository;
use luga_models::LipSyncStatus;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ApiConfig;
use crate::metrics;
use crate::services::lipsync::{LipSyncService, UpdateSource};

/// Shortest tick; `tokio::time::interval` rejects a zero period.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Jobs loaded per tick.
const BATCH_SIZE: u32 = 50;

pub const TIMEOUT_REASON: &str = "timed out";

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub checked: usize,
    pub updated: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct LipSyncPoller {
    jobs: LipSyncJobRepository,
    lipsync: LipSyncService,
    enabled: bool,
    poll_interval: Duration,
    job_timeout: Duration,
}

impl LipSyncPoller {
    pub fn new(jobs: LipSyncJobRepository, lipsync: LipSyncService, config: &ApiConfig) -> Self {
        Self {
            jobs,
            lipsync,
            enabled: config.lipsync_poller_enabled,
            poll_interval: config.lipsync_poll_interval.max(MIN_POLL_INTERVAL),
            job_timeout: config.lipsync_job_timeout,
        }
    }

    /// Run until the task is dropped.
    pub async fn run(&self) {
        if !self.enabled {
            info!("Lip-sync poller is disabled");
            return;
        }

        info!(interval = ?self.poll_interval, timeout = ?self.job_timeout, "Starting lip-sync poller");

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.check_once().await {
                Ok(stats) if stats.checked > 0 => info!(
                    checked = stats.checked,
                    updated = stats.updated,
                    completed = stats.completed,
                    failed = stats.failed,
                    "Lip-sync poll complete"
                ),
                Ok(_) => debug!("No lip-sync jobs to poll"),
                Err(e) => error!(error = %e, "Lip-sync poll failed"),
            }
        }
    }

    /// Run a single poll cycle.
    pub async fn check_once(&self) -> anyhow::Result<PollStats> {
        let active = self.jobs.list_active(BATCH_SIZE).await?;
        let now = Utc::now();
        let recent = chrono::Duration::from_std(self.poll_interval).unwrap_or_else(|_| chrono::Duration::seconds(30));
        let max_age = self.job_timeout.as_secs() as i64;

        let mut stats = PollStats::default();

        for job in active {
            if job.is_overdue(now, max_age) {
                stats.checked += 1;
                match self.lipsync.fail(job, TIMEOUT_REASON).await {
                    Ok(Some(_)) => {
                        stats.updated += 1;
                        stats.failed += 1;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Failed to time out lip-sync job"),
                }
                continue;
            }

            // The webhook or a status request may have just refreshed it.
            if job.last_polled_at.is_some_and(|at| now - at < recent) {
                continue;
            }

            stats.checked += 1;
            let job_id = job.job_id.clone();
            let before = job.status;
            match self.lipsync.refresh(job, UpdateSource::Poller).await {
                Ok(job) if job.status != before => {
                    stats.updated += 1;
                    match job.status {
                        LipSyncStatus::Completed => stats.completed += 1,
                        LipSyncStatus::Failed | LipSyncStatus::Rejected => stats.failed += 1,
                        _ => {}
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(job_id = %job_id, error = %e, "Failed to refresh lip-sync job"),
            }
        }

        metrics::record_lipsync_poll(stats.checked);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::QuotaService;
    use luga_clients::{MailConfig, Mailer, SyncClient, SyncConfig};
    use luga_firestore::{FirestoreClient, FirestoreConfig, QuotaRepository};
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job_doc(id: &str, status: &str, created_at: &str) -> serde_json::Value {
        json!({
            "document": {
                "name": format!("projects/test/databases/(default)/documents/lipsync_jobs/{}", id),
                "fields": {
                    "job_id": {"stringValue": id},
                    "user_id": {"stringValue": "u1"},
                    "video_id": {"stringValue": "v1"},
                    "audio_id": {"stringValue": "a1"},
                    "video_url": {"stringValue": "https://cdn/v.mp4"},
                    "audio_url": {"stringValue": "https://cdn/a.mp3"},
                    "model": {"stringValue": "lipsync-1.7.1"},
                    "output_format": {"stringValue": "mp4"},
                    "status": {"stringValue": status},
                    "quota_charged_seconds": {"integerValue": "0"},
                    "created_at": {"timestampValue": created_at},
                    "updated_at": {"timestampValue": created_at}
                }
            }
        })
    }

    async fn poller(firestore: &MockServer, sync: &MockServer) -> LipSyncPoller {
        let client = FirestoreClient::new(FirestoreConfig::emulator("test", firestore.address().to_string()))
            .await
            .unwrap();
        let quota = QuotaService::new(
            QuotaRepository::new(client.clone()),
            Mailer::new(MailConfig::disabled()).unwrap(),
        );
        let sync = SyncClient::new(SyncConfig {
            api_key: SecretString::from("k"),
            base_url: sync.uri(),
            webhook_secret: None,
        });
        let jobs = LipSyncJobRepository::new(client);
        let lipsync = LipSyncService::new(sync, jobs.clone(), quota);
        LipSyncPoller::new(jobs, lipsync, &ApiConfig::default())
    }

    #[tokio::test]
    async fn test_poll_times_out_stale_jobs_and_refreshes_others() {
        let firestore = MockServer::start().await;
        let sync = MockServer::start().await;

        let fresh = Utc::now().to_rfc3339();
        let stale = (Utc::now() - chrono::Duration::hours(3)).to_rfc3339();
        Mock::given(method("POST"))
            .and(path_regex(":runQuery$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                job_doc("job-old", "PENDING", &stale),
                job_doc("job-new", "PENDING", &fresh),
            ])))
            .mount(&firestore)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "x"})))
            .mount(&firestore)
            .await;
        Mock::given(method("GET"))
            .and(path("/generate/job-new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "job-new", "status": "PROCESSING"})))
            .expect(1)
            .mount(&sync)
            .await;

        let stats = poller(&firestore, &sync).await.check_once().await.unwrap();
        assert_eq!(
            stats,
            PollStats {
                checked: 2,
                updated: 2,
                completed: 0,
                failed: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_disabled_poller_returns_immediately() {
        let firestore = MockServer::start().await;
        let sync = MockServer::start().await;
        let mut poller = poller(&firestore, &sync).await;
        poller.enabled = false;
        poller.run().await;
    }

    #[tokio::test]
    async fn test_zero_interval_is_raised_to_minimum() {
        let firestore = MockServer::start().await;
        let sync = MockServer::start().await;
        let base = poller(&firestore, &sync).await;
        let config = ApiConfig {
            lipsync_poll_interval: Duration::ZERO,
            ..ApiConfig::default()
        };

        let poller = LipSyncPoller::new(base.jobs.clone(), base.lipsync.clone(), &config);
        assert_eq!(poller.poll_interval, MIN_POLL_INTERVAL);
    }
}
