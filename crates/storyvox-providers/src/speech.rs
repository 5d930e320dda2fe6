//! Cloned-voice text-to-speech.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::config::TtsConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::http::{build_client, endpoint, ensure_success, with_bearer};

const PROVIDER: &str = "tts";

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` in the cloned voice `voice_id`.
    async fn synthesize(&self, voice_id: &str, text: &str) -> ProviderResult<Vec<u8>>;

    /// File extension of the returned audio.
    fn extension(&self) -> &'static str;
}

#[derive(Debug, Serialize)]
struct CloudTtsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// ElevenLabs-style API: `POST /v1/text-to-speech/{voice_id}`.
pub struct CloudSpeech {
    http: Client,
    config: TtsConfig,
}

impl CloudSpeech {
    pub fn new(config: TtsConfig) -> ProviderResult<Self> {
        if config.api_key.is_none() {
            return Err(ProviderError::not_configured("TTS_API_KEY not set"));
        }
        Ok(Self {
            http: build_client(config.timeout)?,
            config,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for CloudSpeech {
    async fn synthesize(&self, voice_id: &str, text: &str) -> ProviderResult<Vec<u8>> {
        let url = endpoint(&self.config.cloud_url, &format!("v1/text-to-speech/{}", voice_id));
        let mut request = self
            .http
            .post(url)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&CloudTtsRequest {
                text,
                model_id: &self.config.model_id,
            });
        if let Some(key) = &self.config.api_key {
            request = request.header("xi-api-key", key);
        }

        let bytes = ensure_success(PROVIDER, request.send().await?).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::invalid_response("empty audio from TTS"));
        }
        debug!(voice_id, chars = text.len(), bytes = bytes.len(), "Synthesized speech");
        Ok(bytes.to_vec())
    }

    fn extension(&self) -> &'static str {
        "mp3"
    }
}

#[derive(Debug, Serialize)]
struct LocalTtsRequest<'a> {
    voice_id: &'a str,
    text: &'a str,
}

/// Self-hosted voice cloning service: `POST /tts`, WAV response.
pub struct LocalSpeech {
    http: Client,
    config: TtsConfig,
}

impl LocalSpeech {
    pub fn new(config: TtsConfig) -> ProviderResult<Self> {
        Ok(Self {
            http: build_client(config.timeout)?,
            config,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for LocalSpeech {
    async fn synthesize(&self, voice_id: &str, text: &str) -> ProviderResult<Vec<u8>> {
        let response = with_bearer(
            self.http.post(endpoint(&self.config.local_url, "tts")),
            self.config.api_key.as_deref(),
        )
        .json(&LocalTtsRequest { voice_id, text })
        .send()
        .await?;

        let bytes = ensure_success(PROVIDER, response).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::invalid_response("empty audio from TTS"));
        }
        debug!(voice_id, chars = text.len(), bytes = bytes.len(), "Synthesized speech locally");
        Ok(bytes.to_vec())
    }

    fn extension(&self) -> &'static str {
        "wav"
    }
}
