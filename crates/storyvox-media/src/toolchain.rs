//! Media toolchain abstraction.
//!
//! The engine only talks to [`MediaToolchain`]; [`FfmpegToolchain`] is the
//! subprocess implementation. Tests substitute an in-process fake.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

use crate::audio::{self, DelayedTrack};
use crate::command::{check_ffmpeg, check_ffprobe, FfmpegRunner};
use crate::concat;
use crate::encoding::EncodingSettings;
use crate::error::{MediaError, MediaResult};
use crate::probe::{self, Codecs};
use crate::video::{self, OverlayLayer};

/// Default per-command timeout.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;

/// Every media operation the pipeline needs.
#[async_trait]
pub trait MediaToolchain: Send + Sync {
    /// Extract a video's audio track.
    async fn extract_audio(&self, video: &Path, output: &Path) -> MediaResult<()>;

    /// Duration in seconds.
    async fn probe_duration(&self, media: &Path) -> MediaResult<f64>;

    /// Video width and height.
    async fn probe_dimensions(&self, video: &Path) -> MediaResult<(u32, u32)>;

    /// Video and audio codec names.
    async fn probe_codecs(&self, media: &Path) -> MediaResult<Codecs>;

    /// Cut `[start, start + duration)` from an audio file.
    async fn cut_audio(&self, input: &Path, output: &Path, start: f64, duration: f64)
        -> MediaResult<()>;

    /// Truncate audio to at most `max_duration`; returns the written duration.
    async fn trim_audio(&self, input: &Path, output: &Path, max_duration: f64) -> MediaResult<f64>;

    /// Delay each track by its offset and mix to exactly `duration`.
    async fn delay_and_mix(
        &self,
        tracks: &[DelayedTrack],
        duration: f64,
        output: &Path,
    ) -> MediaResult<()>;

    /// Cut `[start, start + duration)` from a video, re-encoding.
    async fn cut_video(&self, input: &Path, output: &Path, start: f64, duration: f64)
        -> MediaResult<()>;

    /// Overlay layers onto a base video; the output has no audio.
    async fn overlay(
        &self,
        base: &Path,
        layers: &[OverlayLayer],
        scale: f64,
        output: &Path,
    ) -> MediaResult<()>;

    /// Swap a video's audio track.
    async fn replace_audio(&self, video: &Path, audio: &Path, output: &Path) -> MediaResult<()>;

    /// Join videos in order.
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<()>;
}

/// FFmpeg/FFprobe subprocess toolchain.
#[derive(Debug, Clone)]
pub struct FfmpegToolchain {
    encoding: EncodingSettings,
    timeout_secs: u64,
}

impl Default for FfmpegToolchain {
    fn default() -> Self {
        Self::new(EncodingSettings::default())
    }
}

impl FfmpegToolchain {
    pub fn new(encoding: EncodingSettings) -> Self {
        Self {
            encoding,
            timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn encoding(&self) -> &EncodingSettings {
        &self.encoding
    }

    /// Fail fast at startup when the binaries are missing.
    pub fn verify_installation() -> MediaResult<()> {
        check_ffmpeg()?;
        check_ffprobe()?;
        Ok(())
    }

    fn runner(&self) -> FfmpegRunner {
        FfmpegRunner::new().with_timeout(self.timeout_secs)
    }
}

#[async_trait]
impl MediaToolchain for FfmpegToolchain {
    async fn extract_audio(&self, video: &Path, output: &Path) -> MediaResult<()> {
        audio::extract_audio(&self.runner(), video, output).await
    }

    async fn probe_duration(&self, media: &Path) -> MediaResult<f64> {
        probe::probe_duration(media).await
    }

    async fn probe_dimensions(&self, video: &Path) -> MediaResult<(u32, u32)> {
        probe::probe_dimensions(video).await
    }

    async fn probe_codecs(&self, media: &Path) -> MediaResult<Codecs> {
        probe::probe_codecs(media).await
    }

    async fn cut_audio(
        &self,
        input: &Path,
        output: &Path,
        start: f64,
        duration: f64,
    ) -> MediaResult<()> {
        audio::cut_audio(&self.runner(), input, output, start, duration).await
    }

    async fn trim_audio(&self, input: &Path, output: &Path, max_duration: f64) -> MediaResult<f64> {
        audio::trim_audio(&self.runner(), input, output, max_duration).await
    }

    async fn delay_and_mix(
        &self,
        tracks: &[DelayedTrack],
        duration: f64,
        output: &Path,
    ) -> MediaResult<()> {
        audio::delay_and_mix(&self.runner(), tracks, duration, output).await
    }

    async fn cut_video(
        &self,
        input: &Path,
        output: &Path,
        start: f64,
        duration: f64,
    ) -> MediaResult<()> {
        video::cut_video(&self.runner(), &self.encoding, input, output, start, duration).await
    }

    async fn overlay(
        &self,
        base: &Path,
        layers: &[OverlayLayer],
        scale: f64,
        output: &Path,
    ) -> MediaResult<()> {
        video::overlay(&self.runner(), &self.encoding, base, layers, scale, output).await
    }

    async fn replace_audio(&self, video: &Path, audio: &Path, output: &Path) -> MediaResult<()> {
        video::replace_audio(&self.runner(), &self.encoding, video, audio, output).await
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<()> {
        concat::concat(&self.runner(), &self.encoding, inputs, output).await
    }
}

/// Caps the number of concurrent FFmpeg/FFprobe processes.
///
/// One instance is shared by every job; each call holds a slot for the
/// lifetime of its subprocess.
pub struct ProcessLimitedToolchain {
    inner: Arc<dyn MediaToolchain>,
    slots: Semaphore,
    max_processes: usize,
}

impl ProcessLimitedToolchain {
    pub fn new(inner: Arc<dyn MediaToolchain>, max_processes: usize) -> Self {
        let max_processes = max_processes.max(1);
        Self {
            inner,
            slots: Semaphore::new(max_processes),
            max_processes,
        }
    }

    pub fn max_processes(&self) -> usize {
        self.max_processes
    }

    async fn slot(&self, operation: &'static str) -> MediaResult<SemaphorePermit<'_>> {
        let permit = self.slots.acquire().await.map_err(|_| MediaError::SlotsClosed)?;
        debug!(operation, free = self.slots.available_permits(), "Acquired FFmpeg slot");
        Ok(permit)
    }
}

#[async_trait]
impl MediaToolchain for ProcessLimitedToolchain {
    async fn extract_audio(&self, video: &Path, output: &Path) -> MediaResult<()> {
        let _slot = self.slot("extract_audio").await?;
        self.inner.extract_audio(video, output).await
    }

    async fn probe_duration(&self, media: &Path) -> MediaResult<f64> {
        let _slot = self.slot("probe_duration").await?;
        self.inner.probe_duration(media).await
    }

    async fn probe_dimensions(&self, video: &Path) -> MediaResult<(u32, u32)> {
        let _slot = self.slot("probe_dimensions").await?;
        self.inner.probe_dimensions(video).await
    }

    async fn probe_codecs(&self, media: &Path) -> MediaResult<Codecs> {
        let _slot = self.slot("probe_codecs").await?;
        self.inner.probe_codecs(media).await
    }

    async fn cut_audio(
        &self,
        input: &Path,
        output: &Path,
        start: f64,
        duration: f64,
    ) -> MediaResult<()> {
        let _slot = self.slot("cut_audio").await?;
        self.inner.cut_audio(input, output, start, duration).await
    }

    async fn trim_audio(&self, input: &Path, output: &Path, max_duration: f64) -> MediaResult<f64> {
        let _slot = self.slot("trim_audio").await?;
        self.inner.trim_audio(input, output, max_duration).await
    }

    async fn delay_and_mix(
        &self,
        tracks: &[DelayedTrack],
        duration: f64,
        output: &Path,
    ) -> MediaResult<()> {
        let _slot = self.slot("delay_and_mix").await?;
        self.inner.delay_and_mix(tracks, duration, output).await
    }

    async fn cut_video(
        &self,
        input: &Path,
        output: &Path,
        start: f64,
        duration: f64,
    ) -> MediaResult<()> {
        let _slot = self.slot("cut_video").await?;
        self.inner.cut_video(input, output, start, duration).await
    }

    async fn overlay(
        &self,
        base: &Path,
        layers: &[OverlayLayer],
        scale: f64,
        output: &Path,
    ) -> MediaResult<()> {
        let _slot = self.slot("overlay").await?;
        self.inner.overlay(base, layers, scale, output).await
    }

    async fn replace_audio(&self, video: &Path, audio: &Path, output: &Path) -> MediaResult<()> {
        let _slot = self.slot("replace_audio").await?;
        self.inner.replace_audio(video, audio, output).await
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<()> {
        let _slot = self.slot("concat").await?;
        self.inner.concat(inputs, output).await
    }
}
