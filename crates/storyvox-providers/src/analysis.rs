//! Speaker classification for story analysis, via Gemini.
//!
//! Given the transcript segments of a story video, the model names the
//! story, describes it, lists the distinct speakers and assigns each
//! segment to one of them.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use storyvox_models::TranscriptSegment;

use crate::config::GeminiConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::http::{build_client, endpoint, ensure_success};

const PROVIDER: &str = "gemini";

/// A speaker as described by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedSpeaker {
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Segment index → speaker label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentAssignment {
    pub index: u32,
    pub speaker: String,
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub speakers: Vec<ClassifiedSpeaker>,
    #[serde(default)]
    pub assignments: Vec<SegmentAssignment>,
}

#[async_trait]
pub trait SpeakerClassifier: Send + Sync {
    /// Classify speakers. `api_key_override` replaces the configured key
    /// for this call only.
    async fn classify(
        &self,
        segments: &[TranscriptSegment],
        api_key_override: Option<&str>,
    ) -> ProviderResult<Classification>;
}

// ============================================================================
// Gemini wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

/// Gemini `generateContent` client in JSON mode, with model fallback.
pub struct GeminiClassifier {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClassifier {
    pub fn new(config: GeminiConfig) -> ProviderResult<Self> {
        Ok(Self {
            http: build_client(config.timeout)?,
            config,
        })
    }

    fn build_prompt(segments: &[TranscriptSegment]) -> String {
        let transcript = segments
            .iter()
            .map(|s| format!("[{}] ({:.2}-{:.2}) {}", s.index, s.start, s.end, s.text))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"You are analyzing the transcript of a children's story video.

Return ONLY a single JSON object with this schema:
{{
  "title": "Short title of the story",
  "description": "One or two sentence summary",
  "speakers": [
    {{"label": "Narrator", "description": "Who this speaker is"}}
  ],
  "assignments": [
    {{"index": 0, "speaker": "Narrator"}}
  ]
}}

Rules:
- Use the same label for the same voice throughout.
- Every transcript line gets exactly one assignment, keyed by its [index].
- Every assigned speaker must appear in "speakers".
- If only one person speaks, return a single speaker.

TRANSCRIPT:
{transcript}
"#
        )
    }

    async fn call_model(&self, model: &str, api_key: &str, prompt: &str) -> ProviderResult<Classification> {
        let url = endpoint(
            &self.config.base_url,
            &format!("v1beta/models/{}:generateContent", model),
        );
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
            },
        };

        let response = self
            .http
            .post(url)
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await?;
        let response: GeminiResponse = ensure_success(PROVIDER, response).await?.json().await?;

        let text = response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or_else(|| ProviderError::invalid_response("No content in Gemini response"))?;

        parse_classification(text)
    }
}

/// Parse the model's JSON, tolerating a markdown code fence.
fn parse_classification(text: &str) -> ProviderResult<Classification> {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);

    let classification: Classification = serde_json::from_str(text.trim())
        .map_err(|e| ProviderError::invalid_response(format!("Failed to parse classification JSON: {}", e)))?;
    if classification.speakers.is_empty() {
        return Err(ProviderError::invalid_response("classification has no speakers"));
    }
    Ok(classification)
}

#[async_trait]
impl SpeakerClassifier for GeminiClassifier {
    async fn classify(
        &self,
        segments: &[TranscriptSegment],
        api_key_override: Option<&str>,
    ) -> ProviderResult<Classification> {
        let api_key = api_key_override
            .or(self.config.api_key.as_deref())
            .ok_or_else(|| ProviderError::not_configured("GEMINI_API_KEY not set"))?;
        let prompt = Self::build_prompt(segments);

        let mut last_error = None;
        for model in &self.config.models {
            info!(model = %model, segments = segments.len(), "Classifying speakers");
            match self.call_model(model, api_key, &prompt).await {
                Ok(classification) => {
                    info!(
                        model = %model,
                        speakers = classification.speakers.len(),
                        "Speaker classification succeeded"
                    );
                    return Ok(classification);
                }
                // Models share one quota
                Err(e) if e.is_rate_limited() => return Err(e),
                Err(e) => {
                    warn!(model = %model, error = %e, "Gemini model failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::not_configured("no Gemini models configured")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn classifier(server: &MockServer, models: &[&str]) -> GeminiClassifier {
        GeminiClassifier::new(GeminiConfig {
            base_url: server.uri(),
            api_key: Some("default-key".to_string()),
            models: models.iter().map(|m| m.to_string()).collect(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn gemini_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": text}]}}]
        })
    }

    fn segments() -> Vec<TranscriptSegment> {
        vec![
            TranscriptSegment::new(0, 0.0, 2.0, "Once upon a time"),
            TranscriptSegment::new(1, 2.5, 4.0, "Who is there?"),
        ]
    }

    #[test]
    fn test_parse_fenced_json() {
        let parsed = parse_classification(
            "```json\n{\"title\":\"T\",\"speakers\":[{\"label\":\"Narrator\"}]}\n```",
        )
        .unwrap();
        assert_eq!(parsed.title, "T");
        assert_eq!(parsed.speakers[0].label, "Narrator");
        assert!(parsed.assignments.is_empty());
    }

    #[test]
    fn test_prompt_lists_indexed_segments() {
        let prompt = GeminiClassifier::build_prompt(&segments());
        assert!(prompt.contains("[0] (0.00-2.00) Once upon a time"));
        assert!(prompt.contains("[1] (2.50-4.00) Who is there?"));
    }

    #[tokio::test]
    async fn test_classify_uses_override_key() {
        let server = MockServer::start().await;
        let text = r#"{"title":"The Fox","description":"d","speakers":[{"label":"Narrator"},{"label":"Fox"}],"assignments":[{"index":0,"speaker":"Narrator"},{"index":1,"speaker":"Fox"}]}"#;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/m1:generateContent"))
            .and(query_param("key", "user-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body(text)))
            .expect(1)
            .mount(&server)
            .await;

        let result = classifier(&server, &["m1"])
            .classify(&segments(), Some("user-key"))
            .await
            .unwrap();
        assert_eq!(result.title, "The Fox");
        assert_eq!(result.assignments[1].speaker, "Fox");
    }

    #[tokio::test]
    async fn test_classify_falls_back_to_next_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/m1:generateContent"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/m2:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body(
                r#"{"title":"T","speakers":[{"label":"Narrator"}]}"#,
            )))
            .mount(&server)
            .await;

        let result = classifier(&server, &["m1", "m2"])
            .classify(&segments(), None)
            .await
            .unwrap();
        assert_eq!(result.speakers.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_stops_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/m1:generateContent"))
            .respond_with(
                ResponseTemplate::new(429).set_body_string(r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/m2:generateContent"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = classifier(&server, &["m1", "m2"])
            .classify(&segments(), None)
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert!(err.to_string().contains("RESOURCE_EXHAUSTED"));
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let server = MockServer::start().await;
        let classifier = GeminiClassifier::new(GeminiConfig {
            base_url: server.uri(),
            ..GeminiConfig::default()
        })
        .unwrap();
        assert!(matches!(
            classifier.classify(&segments(), None).await,
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
