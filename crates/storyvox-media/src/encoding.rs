//! Output encoding settings shared by every composed segment.
//!
//! Segments from both compositing modes are written with the same settings
//! so the final concatenation can stream-copy.

use serde::{Deserialize, Serialize};

use crate::command::FfmpegCommand;

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "fast";
/// Default CRF
pub const DEFAULT_CRF: u8 = 20;
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "192k";
/// Sample rate for every intermediate and output audio track
pub const SAMPLE_RATE: u32 = 44_100;
/// Channel count for every intermediate and output audio track
pub const CHANNELS: u8 = 2;

/// Encoding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingSettings {
    #[serde(default = "default_video_codec")]
    pub video_codec: String,

    #[serde(default = "default_preset")]
    pub preset: String,

    #[serde(default = "default_crf")]
    pub crf: u8,

    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_crf() -> u8 {
    DEFAULT_CRF
}
fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}
fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}

impl Default for EncodingSettings {
    fn default() -> Self {
        Self {
            video_codec: default_video_codec(),
            preset: default_preset(),
            crf: DEFAULT_CRF,
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

impl EncodingSettings {
    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = crf.min(51);
        self
    }

    /// Append video encoding arguments.
    pub fn apply_video(&self, cmd: FfmpegCommand) -> FfmpegCommand {
        cmd.video_codec(&self.video_codec)
            .preset(&self.preset)
            .crf(self.crf)
            .output_args(["-pix_fmt", "yuv420p"])
    }

    /// Append audio encoding arguments.
    pub fn apply_audio(&self, cmd: FfmpegCommand) -> FfmpegCommand {
        cmd.audio_codec(&self.audio_codec)
            .audio_bitrate(&self.audio_bitrate)
            .audio_format(SAMPLE_RATE, CHANNELS)
    }
}
