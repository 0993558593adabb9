//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use luga_models::{LipSyncStatus, QuotaKind};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "luga_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "luga_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "luga_http_requests_in_flight";

    // Quota metrics
    pub const QUOTA_DEDUCTED_TOTAL: &str = "luga_quota_deducted_total";
    pub const QUOTA_REJECTIONS_TOTAL: &str = "luga_quota_rejections_total";
    pub const QUOTA_LOW_WARNINGS_TOTAL: &str = "luga_quota_low_warnings_total";

    // Lip-sync metrics
    pub const LIPSYNC_JOBS_SUBMITTED_TOTAL: &str = "luga_lipsync_jobs_submitted_total";
    pub const LIPSYNC_JOBS_FINISHED_TOTAL: &str = "luga_lipsync_jobs_finished_total";
    pub const LIPSYNC_POLL_RUNS_TOTAL: &str = "luga_lipsync_poll_runs_total";
    pub const LIPSYNC_POLL_CHECKED: &str = "luga_lipsync_poll_checked";

    // Generation metrics
    pub const TTS_SECONDS_TOTAL: &str = "luga_tts_seconds_total";
    pub const CHAT_COMPLETIONS_TOTAL: &str = "luga_chat_completions_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "luga_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_quota_deducted(kind: QuotaKind, amount: i64) {
    if amount > 0 {
        counter!(names::QUOTA_DEDUCTED_TOTAL, "kind" => kind.as_str()).increment(amount as u64);
    }
}

pub fn record_quota_rejection(kind: QuotaKind) {
    counter!(names::QUOTA_REJECTIONS_TOTAL, "kind" => kind.as_str()).increment(1);
}

pub fn record_low_quota_warning(kind: QuotaKind) {
    counter!(names::QUOTA_LOW_WARNINGS_TOTAL, "kind" => kind.as_str()).increment(1);
}

pub fn record_lipsync_submitted(model: &str) {
    let labels = [("model", model.to_string())];
    counter!(names::LIPSYNC_JOBS_SUBMITTED_TOTAL, &labels).increment(1);
}

/// Record a job reaching a terminal state. `source` is `request`, `webhook` or `poller`.
pub fn record_lipsync_finished(status: LipSyncStatus, source: &'static str) {
    counter!(
        names::LIPSYNC_JOBS_FINISHED_TOTAL,
        "status" => status.as_str(),
        "source" => source
    )
    .increment(1);
}

pub fn record_lipsync_poll(checked: usize) {
    counter!(names::LIPSYNC_POLL_RUNS_TOTAL).increment(1);
    gauge!(names::LIPSYNC_POLL_CHECKED).set(checked as f64);
}

pub fn record_tts_seconds(seconds: i64) {
    counter!(names::TTS_SECONDS_TOTAL).increment(seconds.max(0) as u64);
}

pub fn record_chat_completion(provider: &'static str) {
    counter!(names::CHAT_COMPLETIONS_TOTAL, "provider" => provider).increment(1);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Replace id-like path segments so label cardinality stays bounded.
///
/// A segment is treated as an id when it contains a digit or is at least
/// 24 characters long (record ids, job ids, timestamps, dimensions).
fn sanitize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.chars().any(|c| c.is_ascii_digit()) || segment.len() >= 24 {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/video/job/3f2b8c4e9a1d4e6f8b7a6c5d4e3f2a1b"),
            "/api/video/job/:id"
        );
        assert_eq!(sanitize_path("/api/video/placeholder/640/360"), "/api/video/placeholder/:id/:id");
        assert_eq!(sanitize_path("/api/text/conversation/1700000000000"), "/api/text/conversation/:id");
        assert_eq!(sanitize_path("/api/voice/text-to-speech"), "/api/voice/text-to-speech");
        assert_eq!(sanitize_path("/"), "/");
    }
}
