//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use storyvox_media::Corner;

/// Segmentation and chunking bounds, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentationConfig {
    /// A gap longer than this between two words closes the segment
    pub pause_threshold: f64,
    /// A segment never grows past this duration
    pub max_segment_duration: f64,
    /// Chunks group segments up to this duration
    pub max_chunk_duration: f64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            pause_threshold: 0.7,
            max_segment_duration: 10.0,
            max_chunk_duration: 30.0,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub segmentation: SegmentationConfig,
    /// Retries per external call before the segment is given up
    pub call_retries: u32,
    /// Backoff unit between call retries (doubles each attempt)
    pub retry_base_delay: Duration,
    /// Concurrent external calls across all jobs
    pub max_external_calls: usize,
    /// Concurrent FFmpeg/FFprobe processes across all jobs
    pub max_ffmpeg_processes: usize,
    /// Avatar width as a fraction of the source width
    pub pip_scale: f64,
    /// Corner of the first avatar; further speakers follow in corner order
    pub pip_corner: Corner,
    /// Per-job scratch directories live under here
    pub work_dir: PathBuf,
    /// Keep scratch directories after a job ends (debugging)
    pub keep_work_dirs: bool,
    /// Transcription language for story analysis
    pub analysis_language: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            segmentation: SegmentationConfig::default(),
            call_retries: 2,
            retry_base_delay: Duration::from_millis(500),
            max_external_calls: 5,
            max_ffmpeg_processes: 4,
            pip_scale: 0.25,
            pip_corner: Corner::BottomRight,
            work_dir: PathBuf::from("/tmp/storyvox"),
            keep_work_dirs: false,
            analysis_language: "en".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            segmentation: SegmentationConfig {
                pause_threshold: std::env::var("ENGINE_PAUSE_THRESHOLD_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.segmentation.pause_threshold),
                max_segment_duration: std::env::var("ENGINE_MAX_SEGMENT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.segmentation.max_segment_duration),
                max_chunk_duration: std::env::var("ENGINE_MAX_CHUNK_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.segmentation.max_chunk_duration),
            },
            call_retries: std::env::var("ENGINE_CALL_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.call_retries),
            retry_base_delay: Duration::from_millis(
                std::env::var("ENGINE_RETRY_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            max_external_calls: std::env::var("ENGINE_MAX_EXTERNAL_CALLS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_external_calls),
            max_ffmpeg_processes: std::env::var("ENGINE_MAX_FFMPEG_PROCESSES")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_ffmpeg_processes),
            pip_scale: std::env::var("ENGINE_PIP_SCALE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|s: &f64| *s > 0.0 && *s <= 1.0)
                .unwrap_or(defaults.pip_scale),
            pip_corner: std::env::var("ENGINE_PIP_CORNER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pip_corner),
            work_dir: std::env::var("ENGINE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            keep_work_dirs: std::env::var("ENGINE_KEEP_WORK_DIRS")
                .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            analysis_language: std::env::var("ENGINE_ANALYSIS_LANGUAGE")
                .unwrap_or(defaults.analysis_language),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.segmentation.pause_threshold, 0.7);
        assert_eq!(config.segmentation.max_chunk_duration, 30.0);
        assert_eq!(config.call_retries, 2);
        assert_eq!(config.max_external_calls, 5);
        assert_eq!(config.max_ffmpeg_processes, 4);
        assert_eq!(config.pip_corner, Corner::BottomRight);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("ENGINE_MAX_CHUNK_SECS", "45");
        std::env::set_var("ENGINE_PIP_CORNER", "top-left");
        std::env::set_var("ENGINE_PIP_SCALE", "3.0");
        std::env::set_var("ENGINE_MAX_FFMPEG_PROCESSES", "2");
        let config = EngineConfig::from_env();
        std::env::remove_var("ENGINE_MAX_FFMPEG_PROCESSES");
        std::env::remove_var("ENGINE_MAX_CHUNK_SECS");
        std::env::remove_var("ENGINE_PIP_CORNER");
        std::env::remove_var("ENGINE_PIP_SCALE");

        assert_eq!(config.segmentation.max_chunk_duration, 45.0);
        assert_eq!(config.pip_corner, Corner::TopLeft);
        assert_eq!(config.max_ffmpeg_processes, 2);
        // Out-of-range scale falls back to the default
        assert_eq!(config.pip_scale, 0.25);
    }
}
