//! Analysis queue configuration.

use std::time::Duration;

/// Default rate-limit signatures, matched case-insensitively.
pub const DEFAULT_RATE_LIMIT_SIGNATURES: &[&str] = &[
    "429",
    "RESOURCE_EXHAUSTED",
    "rate limit",
    "rate_limit",
    "quota",
    "Too Many Requests",
];

#[derive(Debug, Clone)]
pub struct AnalysisQueueConfig {
    /// Rate-limit retries before a story is marked failed
    pub max_retries: u32,
    /// Backoff unit; attempt n waits `retry_base_delay × (n + 1)`
    pub retry_base_delay: Duration,
    /// Pause between two dequeues
    pub dequeue_interval: Duration,
    pub rate_limit_signatures: Vec<String>,
    /// Speech share above which a multi-speaker result collapses to one
    /// speaker. Values ≥ 1.0 disable collapsing.
    pub single_speaker_threshold: f64,
}

impl Default for AnalysisQueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_secs(30),
            dequeue_interval: Duration::from_secs(5),
            rate_limit_signatures: DEFAULT_RATE_LIMIT_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            single_speaker_threshold: 0.8,
        }
    }
}

impl AnalysisQueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: std::env::var("ANALYSIS_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_base_delay: Duration::from_secs(
                std::env::var("ANALYSIS_RETRY_BASE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            dequeue_interval: Duration::from_secs(
                std::env::var("ANALYSIS_DEQUEUE_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            rate_limit_signatures: std::env::var("ANALYSIS_RATE_LIMIT_SIGNATURES")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.rate_limit_signatures),
            single_speaker_threshold: std::env::var("ANALYSIS_SINGLE_SPEAKER_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.single_speaker_threshold),
        }
    }

    /// Delay before retry number `retry_count + 1`.
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        self.retry_base_delay * (retry_count + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_retry_delay_is_linear() {
        let config = AnalysisQueueConfig::default();
        assert_eq!(config.retry_delay(0), Duration::from_secs(30));
        assert_eq!(config.retry_delay(2), Duration::from_secs(90));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("ANALYSIS_MAX_RETRIES", "5");
        std::env::set_var("ANALYSIS_RATE_LIMIT_SIGNATURES", "slow down, busy");
        std::env::set_var("ANALYSIS_SINGLE_SPEAKER_THRESHOLD", "1.0");
        let config = AnalysisQueueConfig::from_env();
        std::env::remove_var("ANALYSIS_MAX_RETRIES");
        std::env::remove_var("ANALYSIS_RATE_LIMIT_SIGNATURES");
        std::env::remove_var("ANALYSIS_SINGLE_SPEAKER_THRESHOLD");

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.rate_limit_signatures, vec!["slow down", "busy"]);
        assert_eq!(config.single_speaker_threshold, 1.0);
        assert_eq!(config.dequeue_interval, Duration::from_secs(5));
    }
}
