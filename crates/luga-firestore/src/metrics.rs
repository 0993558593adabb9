//! Firestore metrics.

use metrics::{counter, histogram};

pub mod names {
    /// Requests by operation and status.
    pub const REQUESTS_TOTAL: &str = "firestore_requests_total";

    /// Retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "firestore_retries_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "firestore_latency_seconds";

    /// Documents returned from runQuery, by collection.
    pub const QUERY_DOCUMENTS_TOTAL: &str = "firestore_query_documents_total";

    /// Optimistic-lock conflicts, by repository.
    pub const CONFLICTS_TOTAL: &str = "firestore_conflicts_total";
}

pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

pub fn record_retry(operation: &str) {
    counter!(names::RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

pub fn record_query_documents(collection: &str, count: usize) {
    counter!(names::QUERY_DOCUMENTS_TOTAL, "collection" => collection.to_string())
        .increment(count as u64);
}

pub fn record_conflict(repository: &'static str) {
    counter!(names::CONFLICTS_TOTAL, "repository" => repository).increment(1);
}
