//! Store metrics: request outcomes per collection, plus job and story
//! lifecycle writes.

use std::time::Duration;

use metrics::{counter, histogram};
use storyvox_models::{AnalysisState, JobStatus};

use crate::error::StoreError;

pub mod names {
    /// Firestore requests by collection, operation and outcome.
    pub const REQUESTS_TOTAL: &str = "storyvox_store_requests_total";

    pub const REQUEST_SECONDS: &str = "storyvox_store_request_seconds";

    /// Retried requests by operation.
    pub const RETRIES_TOTAL: &str = "storyvox_store_retries_total";

    /// Job writes that lost an `updateTime` race.
    pub const WRITE_CONFLICTS_TOTAL: &str = "storyvox_store_write_conflicts_total";

    /// Accepted job status writes by resulting status.
    pub const JOB_STATUS_WRITES_TOTAL: &str = "storyvox_store_job_status_writes_total";

    /// Story analysis state changes by resulting state.
    pub const ANALYSIS_STATE_WRITES_TOTAL: &str = "storyvox_store_analysis_state_writes_total";
}

/// Collection a request targeted: the last collection segment of the
/// parent path, `root` for database-wide queries.
pub fn collection_label(parent: &str) -> &str {
    match parent.trim_matches('/').rsplit('/').next() {
        Some("") | None => "root",
        Some(last) => last,
    }
}

/// Outcome label for a finished request.
pub fn outcome_label(error: Option<&StoreError>) -> &'static str {
    match error {
        None => "ok",
        Some(StoreError::NotFound(_)) => "not_found",
        Some(StoreError::PreconditionFailed(_)) => "conflict",
        Some(StoreError::RateLimited(_)) => "rate_limited",
        Some(e) if e.is_retryable() => "unavailable",
        Some(_) => "error",
    }
}

pub fn record_request(operation: &str, parent: &str, error: Option<&StoreError>, elapsed: Duration) {
    let collection = collection_label(parent).to_string();
    counter!(
        names::REQUESTS_TOTAL,
        "collection" => collection.clone(),
        "operation" => operation.to_string(),
        "outcome" => outcome_label(error)
    )
    .increment(1);
    histogram!(
        names::REQUEST_SECONDS,
        "collection" => collection,
        "operation" => operation.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_retry(operation: &str) {
    counter!(names::RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

pub fn record_conflict(collection: &str) {
    counter!(names::WRITE_CONFLICTS_TOTAL, "collection" => collection.to_string()).increment(1);
}

pub fn record_job_status(status: JobStatus) {
    counter!(names::JOB_STATUS_WRITES_TOTAL, "status" => status.as_str()).increment(1);
}

pub fn record_analysis_state(state: AnalysisState) {
    counter!(names::ANALYSIS_STATE_WRITES_TOTAL, "state" => state.as_str()).increment(1);
}
