//! Errors raised while probing, mixing and compositing media.

use std::path::PathBuf;
use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    /// `ffmpeg` or `ffprobe` is not installed.
    #[error("{0} not found in PATH")]
    ToolMissing(&'static str),

    #[error("{tool} failed: {message}")]
    CommandFailed {
        tool: &'static str,
        message: String,
        /// Last lines of stderr, when captured
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFmpeg killed after {0} seconds")]
    Timeout(u64),

    #[error("Input not found: {0}")]
    InputMissing(PathBuf),

    #[error("Unreadable media: {0}")]
    InvalidMedia(String),

    /// Bad cut, mix or overlay parameters; never reaches a subprocess.
    #[error("Invalid media request: {0}")]
    InvalidArgument(String),

    #[error("FFmpeg process slots closed")]
    SlotsClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unparseable ffprobe output: {0}")]
    ProbeOutput(#[from] serde_json::Error),
}

impl MediaError {
    pub fn command_failed(
        tool: &'static str,
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::CommandFailed {
            tool,
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn invalid_media(message: impl Into<String>) -> Self {
        Self::InvalidMedia(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}
