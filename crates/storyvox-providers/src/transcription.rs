//! Speech-to-text with word timestamps.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use storyvox_models::Transcription;

use crate::config::TranscriptionConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::http::{build_client, endpoint, ensure_success, with_bearer};

const PROVIDER: &str = "transcription";

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio at `audio_url`, returning word-level timings.
    async fn transcribe(&self, audio_url: &str, language: &str) -> ProviderResult<Transcription>;
}

#[derive(Debug, Serialize)]
struct TranscribeRequest<'a> {
    audio_url: &'a str,
    language: &'a str,
    word_timestamps: bool,
}

/// HTTP transcription service (`POST /transcribe`).
pub struct HttpTranscriber {
    http: Client,
    config: TranscriptionConfig,
}

impl HttpTranscriber {
    pub fn new(config: TranscriptionConfig) -> ProviderResult<Self> {
        Ok(Self {
            http: build_client(config.timeout)?,
            config,
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio_url: &str, language: &str) -> ProviderResult<Transcription> {
        let request = TranscribeRequest {
            audio_url,
            language,
            word_timestamps: true,
        };
        let response = with_bearer(
            self.http.post(endpoint(&self.config.url, "transcribe")),
            self.config.api_key.as_deref(),
        )
        .json(&request)
        .send()
        .await?;

        let transcription: Transcription = ensure_success(PROVIDER, response).await?.json().await?;
        if transcription.words.is_empty() && !transcription.text.trim().is_empty() {
            return Err(ProviderError::invalid_response(
                "transcription has text but no word timestamps",
            ));
        }

        info!(
            words = transcription.words.len(),
            segments = transcription.segments.len(),
            "Transcription finished"
        );
        Ok(transcription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> TranscriptionConfig {
        TranscriptionConfig {
            url: server.uri(),
            api_key: Some("secret".to_string()),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_transcribe_parses_words() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcribe"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "audio_url": "https://cdn/a.wav",
                "language": "en",
                "word_timestamps": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "once upon",
                "words": [
                    {"word": "once", "start": 0.0, "end": 0.4},
                    {"word": "upon", "start": 0.5, "end": 0.9, "speaker": "A"}
                ],
                "segments": [{"start": 0.0, "end": 0.9, "text": "once upon"}]
            })))
            .mount(&server)
            .await;

        let transcriber = HttpTranscriber::new(config(&server)).unwrap();
        let result = transcriber.transcribe("https://cdn/a.wav", "en").await.unwrap();
        assert_eq!(result.words.len(), 2);
        assert_eq!(result.words[1].speaker.as_deref(), Some("A"));
        assert_eq!(result.segments.len(), 1);
    }

    #[tokio::test]
    async fn test_transcribe_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let transcriber = HttpTranscriber::new(config(&server)).unwrap();
        let err = transcriber.transcribe("https://cdn/a.wav", "en").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_text_without_words_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": "hello"})),
            )
            .mount(&server)
            .await;

        let transcriber = HttpTranscriber::new(config(&server)).unwrap();
        let err = transcriber.transcribe("https://cdn/a.wav", "en").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }
}
