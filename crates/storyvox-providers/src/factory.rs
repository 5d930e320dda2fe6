//! Provider selection, done once at startup.

use std::sync::Arc;

use tracing::info;

use crate::analysis::{GeminiClassifier, SpeakerClassifier};
use crate::avatar::{AvatarGenerator, HttpAvatarGenerator};
use crate::config::{ProviderConfig, VoiceBackend};
use crate::error::ProviderResult;
use crate::separation::{CloudSeparator, LocalSeparator, VocalSeparator};
use crate::speech::{CloudSpeech, LocalSpeech, SpeechSynthesizer};
use crate::transcription::{HttpTranscriber, Transcriber};

/// Every external media service the engine and analysis queue call.
#[derive(Clone)]
pub struct ProviderSet {
    pub transcriber: Arc<dyn Transcriber>,
    pub separator: Arc<dyn VocalSeparator>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub avatar: Arc<dyn AvatarGenerator>,
    pub classifier: Arc<dyn SpeakerClassifier>,
}

impl ProviderSet {
    /// Build clients for the configured backend.
    pub fn from_config(config: &ProviderConfig) -> ProviderResult<Self> {
        let (separator, speech, avatar): (
            Arc<dyn VocalSeparator>,
            Arc<dyn SpeechSynthesizer>,
            Arc<dyn AvatarGenerator>,
        ) = match config.backend {
            VoiceBackend::Cloud => (
                Arc::new(CloudSeparator::new(config.separation.clone())?),
                Arc::new(CloudSpeech::new(config.tts.clone())?),
                Arc::new(HttpAvatarGenerator::new(
                    config.avatar.clone(),
                    config.avatar.cloud_url.clone(),
                )?),
            ),
            VoiceBackend::Local => (
                Arc::new(LocalSeparator::new(config.separation.clone())?),
                Arc::new(LocalSpeech::new(config.tts.clone())?),
                Arc::new(HttpAvatarGenerator::new(
                    config.avatar.clone(),
                    config.avatar.local_url.clone(),
                )?),
            ),
        };

        info!(backend = ?config.backend, "Provider clients initialized");

        Ok(Self {
            transcriber: Arc::new(HttpTranscriber::new(config.transcription.clone())?),
            separator,
            speech,
            avatar,
            classifier: Arc::new(GeminiClassifier::new(config.gemini.clone())?),
        })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::from_config(&ProviderConfig::from_env())
    }
}
