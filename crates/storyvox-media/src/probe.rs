//! FFprobe media information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Video stream details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
}

/// Media file information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    pub video: Option<VideoStreamInfo>,
    pub audio_codec: Option<String>,
}

/// Codec pair used to decide whether segments can be stream-copied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Codecs {
    pub video: Option<String>,
    pub audio: Option<String>,
}

impl MediaInfo {
    pub fn codecs(&self) -> Codecs {
        Codecs {
            video: self.video.as_ref().map(|v| v.codec.clone()),
            audio: self.audio_codec.clone(),
        }
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Probe a media file.
pub async fn probe_media(path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::InputMissing(path.to_path_buf()));
    }

    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::command_failed(
            "ffprobe",
            format!("could not read {}", path.display()),
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
            output.status.code(),
        ));
    }

    parse_probe_output(&output.stdout)
}

/// Parse FFprobe's JSON into [`MediaInfo`].
pub fn parse_probe_output(json: &[u8]) -> MediaResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .map(|s| VideoStreamInfo {
            width: s.width.unwrap_or(0),
            height: s.height.unwrap_or(0),
            fps: s
                .avg_frame_rate
                .as_deref()
                .and_then(parse_frame_rate)
                .or_else(|| s.r_frame_rate.as_deref().and_then(parse_frame_rate))
                .unwrap_or(30.0),
            codec: s.codec_name.clone().unwrap_or_default(),
        });

    let audio_codec = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "audio")
        .and_then(|s| s.codec_name.clone());

    // Container duration first, longest stream otherwise
    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| {
            probe
                .streams
                .iter()
                .filter_map(|s| s.duration.as_deref()?.parse::<f64>().ok())
                .reduce(f64::max)
        })
        .ok_or_else(|| MediaError::invalid_media("no duration reported"))?;

    if video.is_none() && audio_codec.is_none() {
        return Err(MediaError::invalid_media("no audio or video stream found"));
    }

    Ok(MediaInfo {
        duration,
        video,
        audio_codec,
    })
}

/// Get media duration in seconds.
pub async fn probe_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    Ok(probe_media(path).await?.duration)
}

/// Get video width and height.
pub async fn probe_dimensions(path: impl AsRef<Path>) -> MediaResult<(u32, u32)> {
    let info = probe_media(path).await?;
    let video = info
        .video
        .ok_or_else(|| MediaError::invalid_media("no video stream found"))?;
    if video.width == 0 || video.height == 0 {
        return Err(MediaError::invalid_media("video stream has no dimensions"));
    }
    Ok((video.width, video.height))
}

/// Get the video and audio codec names.
pub async fn probe_codecs(path: impl AsRef<Path>) -> MediaResult<Codecs> {
    Ok(probe_media(path).await?.codecs())
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        return (den > 0.0 && num > 0.0).then(|| num / den);
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_parse_video_probe() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
                 "avg_frame_rate": "25/1", "r_frame_rate": "25/1"},
                {"codec_type": "audio", "codec_name": "aac"}
            ],
            "format": {"duration": "12.040000"}
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert!((info.duration - 12.04).abs() < 1e-6);
        let video = info.video.clone().unwrap();
        assert_eq!((video.width, video.height), (1920, 1080));
        assert!((video.fps - 25.0).abs() < 0.01);
        assert_eq!(
            info.codecs(),
            Codecs {
                video: Some("h264".into()),
                audio: Some("aac".into())
            }
        );
    }

    #[test]
    fn test_audio_only_duration_from_stream() {
        let json = br#"{
            "streams": [{"codec_type": "audio", "codec_name": "pcm_s16le", "duration": "3.5"}],
            "format": {}
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert!(info.video.is_none());
        assert!((info.duration - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_probe_rejects_empty_streams() {
        let json = br#"{"streams": [], "format": {"duration": "1.0"}}"#;
        assert!(parse_probe_output(json).is_err());
    }
}
