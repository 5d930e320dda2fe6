//! Analysis queue metrics.

use metrics::{counter, gauge, histogram};

pub mod names {
    pub const COMPLETED_TOTAL: &str = "storyvox_analysis_completed_total";
    pub const FAILED_TOTAL: &str = "storyvox_analysis_failed_total";
    pub const RETRIES_TOTAL: &str = "storyvox_analysis_retries_total";
    pub const QUEUE_DEPTH: &str = "storyvox_analysis_queue_depth";
    pub const DURATION_SECONDS: &str = "storyvox_analysis_duration_seconds";
}

pub fn record_depth(depth: usize) {
    gauge!(names::QUEUE_DEPTH).set(depth as f64);
}

pub fn record_completed(duration_secs: f64) {
    counter!(names::COMPLETED_TOTAL).increment(1);
    histogram!(names::DURATION_SECONDS).record(duration_secs);
}

pub fn record_failed(rate_limited: bool) {
    counter!(names::FAILED_TOTAL, "rate_limited" => rate_limited.to_string()).increment(1);
}

pub fn record_retry() {
    counter!(names::RETRIES_TOTAL).increment(1);
}
