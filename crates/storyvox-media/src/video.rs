//! Video cutting, picture-in-picture overlay and audio replacement.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::encoding::EncodingSettings;
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_dimensions;

/// Gap between an overlay and the frame edge, in pixels.
pub const OVERLAY_MARGIN_PX: u32 = 24;

/// Frame corner an overlay is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Corner {
    #[default]
    BottomRight,
    BottomLeft,
    TopRight,
    TopLeft,
}

impl Corner {
    /// Assignment order for multiple overlays.
    pub const ORDER: [Corner; 4] = [
        Corner::BottomRight,
        Corner::BottomLeft,
        Corner::TopRight,
        Corner::TopLeft,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Corner::BottomRight => "bottom-right",
            Corner::BottomLeft => "bottom-left",
            Corner::TopRight => "top-right",
            Corner::TopLeft => "top-left",
        }
    }

    /// `overlay` filter x/y expressions for this corner.
    pub fn position_expr(&self, margin: u32) -> String {
        match self {
            Corner::BottomRight => format!("W-w-{m}:H-h-{m}", m = margin),
            Corner::BottomLeft => format!("{m}:H-h-{m}", m = margin),
            Corner::TopRight => format!("W-w-{m}:{m}", m = margin),
            Corner::TopLeft => format!("{m}:{m}", m = margin),
        }
    }

    /// The `n`th corner starting from `self` in [`Corner::ORDER`].
    pub fn nth_from(&self, n: usize) -> Corner {
        let start = Corner::ORDER.iter().position(|c| c == self).unwrap_or(0);
        Corner::ORDER[(start + n) % Corner::ORDER.len()]
    }
}

impl fmt::Display for Corner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Corner {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Corner::ORDER
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown corner: {}", s))
    }
}

/// A video placed over the base frame.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayLayer {
    pub path: PathBuf,
    pub corner: Corner,
}

impl OverlayLayer {
    pub fn new(path: impl Into<PathBuf>, corner: Corner) -> Self {
        Self {
            path: path.into(),
            corner,
        }
    }
}

/// Overlay width for a base frame, rounded down to an even pixel count.
pub fn overlay_width(base_width: u32, scale: f64) -> u32 {
    let width = (base_width as f64 * scale.clamp(0.05, 1.0)).floor() as u32;
    (width / 2 * 2).max(2)
}

/// Build the filter graph for `layers` over input 0.
///
/// Each layer is input `i + 1`, scaled to `pip_width` with the aspect ratio
/// preserved. The composed picture is labelled `[vout]`.
pub fn build_overlay_filter(layers: &[OverlayLayer], pip_width: u32) -> String {
    let mut chains = Vec::with_capacity(layers.len() * 2);
    let mut current = "0:v".to_string();

    for (i, layer) in layers.iter().enumerate() {
        let input = i + 1;
        let next = if i + 1 == layers.len() {
            "vout".to_string()
        } else {
            format!("v{input}")
        };
        chains.push(format!("[{input}:v]scale={pip_width}:-2,setsar=1[p{input}]"));
        chains.push(format!(
            "[{current}][p{input}]overlay={pos}:eof_action=pass:format=auto[{next}]",
            pos = layer.corner.position_expr(OVERLAY_MARGIN_PX),
        ));
        current = next;
    }

    chains.join(";")
}

/// Re-encode `[start, start + duration)` of a video, keeping its audio.
pub async fn cut_video(
    runner: &FfmpegRunner,
    encoding: &EncodingSettings,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    start: f64,
    duration: f64,
) -> MediaResult<()> {
    if start < 0.0 || duration <= 0.0 {
        return Err(MediaError::invalid_argument(format!(
            "invalid video cut: start={:.3} duration={:.3}",
            start, duration
        )));
    }
    let cmd = FfmpegCommand::new(input.as_ref(), output.as_ref())
        .seek(start)
        .duration(duration)
        .map("0:v:0")
        .map("0:a:0?");
    let cmd = encoding.apply_audio(encoding.apply_video(cmd));
    runner.run(&cmd).await
}

/// Overlay each layer into its corner, scaled to `scale` of the base width.
///
/// The output has no audio track; pair with [`replace_audio`].
pub async fn overlay(
    runner: &FfmpegRunner,
    encoding: &EncodingSettings,
    base: impl AsRef<Path>,
    layers: &[OverlayLayer],
    scale: f64,
    output: impl AsRef<Path>,
) -> MediaResult<()> {
    let base = base.as_ref();
    let output = output.as_ref();
    if layers.is_empty() {
        return Err(MediaError::invalid_argument("overlay needs at least one layer"));
    }

    let (base_width, _) = probe_dimensions(base).await?;
    let pip_width = overlay_width(base_width, scale);

    let mut cmd = FfmpegCommand::new(base, output);
    for layer in layers {
        cmd = cmd.input(&layer.path);
    }
    let cmd = encoding
        .apply_video(
            cmd.filter_complex(build_overlay_filter(layers, pip_width))
                .map("[vout]"),
        )
        .no_audio();

    info!(
        base = %base.display(),
        layers = layers.len(),
        pip_width,
        "Composing picture-in-picture"
    );
    runner.run(&cmd).await
}

/// Replace a video's audio with `audio`, copying the picture.
///
/// The output is cut to the shorter of the two streams.
pub async fn replace_audio(
    runner: &FfmpegRunner,
    encoding: &EncodingSettings,
    video: impl AsRef<Path>,
    audio: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> MediaResult<()> {
    let cmd = FfmpegCommand::new(video.as_ref(), output.as_ref())
        .input(audio.as_ref())
        .map("0:v:0")
        .map("1:a:0")
        .video_codec("copy");
    let cmd = encoding
        .apply_audio(cmd)
        .output_args(["-shortest", "-movflags", "+faststart"]);
    runner.run(&cmd).await
}
