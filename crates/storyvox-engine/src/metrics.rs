//! Engine metrics.

use metrics::{counter, gauge, histogram};

pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "storyvox_jobs_started_total";
    pub const JOBS_FINISHED_TOTAL: &str = "storyvox_jobs_finished_total";
    pub const JOBS_ACTIVE: &str = "storyvox_jobs_active";
    pub const JOB_DURATION_SECONDS: &str = "storyvox_jobs_duration_seconds";
    pub const CHUNKS_TOTAL: &str = "storyvox_chunks_total";
    pub const CALL_RETRIES_TOTAL: &str = "storyvox_chunks_call_retries_total";
}

pub fn record_job_started() {
    counter!(names::JOBS_STARTED_TOTAL).increment(1);
}

pub fn record_job_finished(status: &'static str, duration_secs: f64) {
    counter!(names::JOBS_FINISHED_TOTAL, "status" => status).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "status" => status).record(duration_secs);
}

pub fn record_active_jobs(count: usize) {
    gauge!(names::JOBS_ACTIVE).set(count as f64);
}

/// `outcome` is one of `pip`, `audio_only`, `dropped`.
pub fn record_chunk(outcome: &'static str) {
    counter!(names::CHUNKS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_call_retry(operation: &str) {
    counter!(names::CALL_RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}
