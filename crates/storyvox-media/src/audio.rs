//! Audio extraction, cutting and time-aligned mixing.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::encoding::{CHANNELS, SAMPLE_RATE};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_duration;

/// Padding applied before the exact trim so short mixes never end early.
pub const MIX_SAFETY_MARGIN_SECS: f64 = 0.5;

/// An audio file placed at an offset on a shared timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayedTrack {
    pub path: PathBuf,
    /// Onset in seconds from the start of the mix
    pub offset: f64,
}

impl DelayedTrack {
    pub fn new(path: impl Into<PathBuf>, offset: f64) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }
}

fn pcm_output(cmd: FfmpegCommand) -> FfmpegCommand {
    cmd.no_video()
        .audio_codec("pcm_s16le")
        .audio_format(SAMPLE_RATE, CHANNELS)
}

/// Extract the audio track of a video as 16-bit PCM WAV.
pub async fn extract_audio(
    runner: &FfmpegRunner,
    video: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> MediaResult<()> {
    let video = video.as_ref();
    let output = output.as_ref();
    if !video.exists() {
        return Err(MediaError::InputMissing(video.to_path_buf()));
    }

    info!(input = %video.display(), output = %output.display(), "Extracting audio");
    let cmd = pcm_output(FfmpegCommand::new(video, output));
    runner.run(&cmd).await
}

/// Cut `[start, start + duration)` out of an audio file.
pub async fn cut_audio(
    runner: &FfmpegRunner,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    start: f64,
    duration: f64,
) -> MediaResult<()> {
    if start < 0.0 || duration <= 0.0 {
        return Err(MediaError::invalid_argument(format!(
            "invalid audio cut: start={:.3} duration={:.3}",
            start, duration
        )));
    }
    let cmd = pcm_output(
        FfmpegCommand::new(input.as_ref(), output.as_ref())
            .seek(start)
            .duration(duration),
    );
    runner.run(&cmd).await
}

/// Truncate an audio file to at most `max_duration` seconds.
///
/// Returns the duration of the written file.
pub async fn trim_audio(
    runner: &FfmpegRunner,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    max_duration: f64,
) -> MediaResult<f64> {
    let input = input.as_ref();
    let output = output.as_ref();
    let duration = probe_duration(input).await?;

    if duration <= max_duration {
        tokio::fs::copy(input, output).await?;
        return Ok(duration);
    }

    debug!(
        input = %input.display(),
        duration,
        max_duration,
        "Truncating audio"
    );
    cut_audio(runner, input, output, 0.0, max_duration).await?;
    Ok(max_duration)
}

/// Build the filter graph that delays each input and mixes them without
/// gain normalization, then fixes the result to exactly `duration`.
pub fn build_mix_filter(offsets: &[f64], duration: f64) -> String {
    let mut chains: Vec<String> = Vec::with_capacity(offsets.len() + 1);
    let mut labels = String::new();

    for (i, offset) in offsets.iter().enumerate() {
        let delay_ms = (offset.max(0.0) * 1000.0).round() as u64;
        chains.push(format!(
            "[{i}:a]aresample={rate},aformat=sample_fmts=fltp:channel_layouts=stereo,adelay=delays={delay_ms}:all=1[d{i}]",
            rate = SAMPLE_RATE,
        ));
        labels.push_str(&format!("[d{i}]"));
    }

    chains.push(format!(
        "{labels}amix=inputs={n}:duration=longest:dropout_transition=0:normalize=0,apad=whole_dur={padded:.3},atrim=end={exact:.3},asetpts=PTS-STARTPTS[mix]",
        n = offsets.len(),
        padded = duration + MIX_SAFETY_MARGIN_SECS,
        exact = duration,
    ));

    chains.join(";")
}

/// Place every track at its offset and mix to a file of exactly `duration`.
///
/// With no tracks the output is silence.
pub async fn delay_and_mix(
    runner: &FfmpegRunner,
    tracks: &[DelayedTrack],
    duration: f64,
    output: impl AsRef<Path>,
) -> MediaResult<()> {
    let output = output.as_ref();
    if duration <= 0.0 {
        return Err(MediaError::invalid_argument(format!(
            "mix duration must be positive, got {:.3}",
            duration
        )));
    }
    if let Some(track) = tracks.iter().find(|t| t.offset < 0.0) {
        return Err(MediaError::invalid_argument(format!(
            "negative offset {:.3} for {}",
            track.offset,
            track.path.display()
        )));
    }

    if tracks.is_empty() {
        return generate_silence(runner, duration, output).await;
    }

    let mut cmd = FfmpegCommand::new(&tracks[0].path, output);
    for track in &tracks[1..] {
        cmd = cmd.input(&track.path);
    }

    let offsets: Vec<f64> = tracks.iter().map(|t| t.offset).collect();
    let cmd = pcm_output(
        cmd.filter_complex(build_mix_filter(&offsets, duration))
            .map("[mix]")
            .output_duration(duration),
    );

    debug!(tracks = tracks.len(), duration, "Mixing delayed tracks");
    runner.run(&cmd).await
}

/// Write `duration` seconds of silence.
pub async fn generate_silence(
    runner: &FfmpegRunner,
    duration: f64,
    output: impl AsRef<Path>,
) -> MediaResult<()> {
    let source = format!("anullsrc=r={}:cl=stereo", SAMPLE_RATE);
    let cmd = pcm_output(FfmpegCommand::lavfi(source, output.as_ref()).output_duration(duration));
    runner.run(&cmd).await
}
