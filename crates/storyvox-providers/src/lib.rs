//! External media service clients for StoryVox.
//!
//! This crate provides:
//! - Transcription with word timestamps
//! - Vocal/background separation (cloud task polling or local single call)
//! - Cloned-voice speech synthesis (cloud or self-hosted)
//! - Avatar video synthesis (create a task, then poll it)
//! - Speaker classification via Gemini
//! - The shared call limiter and the polling loop
//!
//! Local and cloud variants sit behind capability traits and are chosen
//! once by [`ProviderSet::from_config`].

pub mod analysis;
pub mod avatar;
pub mod config;
pub mod error;
pub mod factory;
mod http;
pub mod limiter;
pub mod poll;
pub mod separation;
pub mod speech;
pub mod transcription;

pub use analysis::{Classification, ClassifiedSpeaker, GeminiClassifier, SegmentAssignment, SpeakerClassifier};
pub use avatar::{AvatarGenerator, AvatarRequest, AvatarTaskStatus, HttpAvatarGenerator};
pub use config::{AvatarConfig, GeminiConfig, ProviderConfig, SeparationConfig, TranscriptionConfig, TtsConfig, VoiceBackend};
pub use error::{ProviderError, ProviderResult};
pub use factory::ProviderSet;
pub use limiter::CallLimiter;
pub use poll::{poll_until, PollConfig};
pub use separation::{CloudSeparator, LocalSeparator, SeparatedStems, VocalSeparator};
pub use speech::{CloudSpeech, LocalSpeech, SpeechSynthesizer};
pub use transcription::{HttpTranscriber, Transcriber};
