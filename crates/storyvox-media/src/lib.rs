//! FFmpeg CLI wrapper for audio reconstruction and video compositing.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multiple inputs
//! - Progress parsing from `-progress pipe:2`
//! - Timeout and cancellation support via tokio
//! - FFprobe duration, dimension and codec probing
//! - Audio extraction, cutting and delay-and-mix reconstruction
//! - Picture-in-picture overlay, audio replacement and concatenation
//! - The [`MediaToolchain`] trait the pipeline is written against, and a
//!   wrapper that caps concurrent FFmpeg processes

pub mod audio;
pub mod command;
pub mod concat;
pub mod encoding;
pub mod error;
pub mod probe;
pub mod progress;
pub mod toolchain;
pub mod video;

pub use audio::{build_mix_filter, DelayedTrack, MIX_SAFETY_MARGIN_SECS};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use encoding::EncodingSettings;
pub use error::{MediaError, MediaResult};
pub use probe::{probe_media, Codecs, MediaInfo, VideoStreamInfo};
pub use progress::FfmpegProgress;
pub use toolchain::{FfmpegToolchain, MediaToolchain, ProcessLimitedToolchain};
pub use video::{overlay_width, Corner, OverlayLayer};
