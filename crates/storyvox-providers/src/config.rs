//! Provider configuration.

use std::str::FromStr;
use std::time::Duration;

use crate::poll::PollConfig;

/// Which family of speech/avatar/separation services to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceBackend {
    /// Self-hosted services on the local network
    Local,
    /// Hosted SaaS APIs
    #[default]
    Cloud,
}

impl FromStr for VoiceBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(VoiceBackend::Local),
            "cloud" => Ok(VoiceBackend::Cloud),
            other => Err(format!("unknown voice backend: {}", other)),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

/// Text-to-speech settings.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// ElevenLabs-style API base
    pub cloud_url: String,
    pub api_key: Option<String>,
    pub model_id: String,
    /// Self-hosted `/tts` service base
    pub local_url: String,
    pub timeout: Duration,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            cloud_url: "https://api.elevenlabs.io".to_string(),
            api_key: None,
            model_id: "eleven_multilingual_v2".to_string(),
            local_url: "http://localhost:8010".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Avatar video synthesis settings.
#[derive(Debug, Clone)]
pub struct AvatarConfig {
    pub cloud_url: String,
    pub local_url: String,
    pub api_key: Option<String>,
    /// Longest audio the provider accepts
    pub max_audio_duration: Duration,
    pub poll: PollConfig,
    pub timeout: Duration,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            cloud_url: "https://api.avatar.example.com".to_string(),
            local_url: "http://localhost:8020".to_string(),
            api_key: None,
            max_audio_duration: Duration::from_secs(59),
            poll: PollConfig::default(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Vocal separation settings.
#[derive(Debug, Clone)]
pub struct SeparationConfig {
    pub cloud_url: String,
    pub local_url: String,
    pub api_key: Option<String>,
    pub poll: PollConfig,
    pub timeout: Duration,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            cloud_url: "https://api.separation.example.com".to_string(),
            local_url: "http://localhost:8030".to_string(),
            api_key: None,
            poll: PollConfig::default(),
            // Local separation answers synchronously
            timeout: Duration::from_secs(900),
        }
    }
}

/// Transcription settings.
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8040".to_string(),
            api_key: None,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Gemini classification settings.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Tried in order until one answers
    pub models: Vec<String>,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_key: None,
            models: vec!["gemini-2.5-flash".to_string(), "gemini-2.5-flash-lite".to_string()],
            timeout: Duration::from_secs(120),
        }
    }
}

/// All provider settings, chosen once at startup.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub backend: VoiceBackend,
    pub tts: TtsConfig,
    pub avatar: AvatarConfig,
    pub separation: SeparationConfig,
    pub transcription: TranscriptionConfig,
    pub gemini: GeminiConfig,
}

impl ProviderConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let poll = |prefix: &str, fallback: PollConfig| PollConfig {
            interval: Duration::from_secs(env_parse(
                &format!("{}_POLL_INTERVAL_SECS", prefix),
                fallback.interval.as_secs(),
            )),
            max_attempts: env_parse(&format!("{}_POLL_MAX_ATTEMPTS", prefix), fallback.max_attempts),
        };

        let models = env_opt("GEMINI_MODELS")
            .map(|s| {
                s.split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| defaults.gemini.models.clone());

        Self {
            backend: env_parse("VOICE_BACKEND", defaults.backend),
            tts: TtsConfig {
                cloud_url: env_string("TTS_CLOUD_URL", &defaults.tts.cloud_url),
                api_key: env_opt("TTS_API_KEY"),
                model_id: env_string("TTS_MODEL_ID", &defaults.tts.model_id),
                local_url: env_string("TTS_LOCAL_URL", &defaults.tts.local_url),
                timeout: Duration::from_secs(env_parse("TTS_TIMEOUT_SECS", 120)),
            },
            avatar: AvatarConfig {
                cloud_url: env_string("AVATAR_CLOUD_URL", &defaults.avatar.cloud_url),
                local_url: env_string("AVATAR_LOCAL_URL", &defaults.avatar.local_url),
                api_key: env_opt("AVATAR_API_KEY"),
                max_audio_duration: Duration::from_secs(env_parse("AVATAR_MAX_AUDIO_SECS", 59)),
                poll: poll("AVATAR", defaults.avatar.poll),
                timeout: Duration::from_secs(env_parse("AVATAR_TIMEOUT_SECS", 60)),
            },
            separation: SeparationConfig {
                cloud_url: env_string("SEPARATION_CLOUD_URL", &defaults.separation.cloud_url),
                local_url: env_string("SEPARATION_LOCAL_URL", &defaults.separation.local_url),
                api_key: env_opt("SEPARATION_API_KEY"),
                poll: poll("SEPARATION", defaults.separation.poll),
                timeout: Duration::from_secs(env_parse("SEPARATION_TIMEOUT_SECS", 900)),
            },
            transcription: TranscriptionConfig {
                url: env_string("TRANSCRIBE_URL", &defaults.transcription.url),
                api_key: env_opt("TRANSCRIBE_API_KEY"),
                timeout: Duration::from_secs(env_parse("TRANSCRIBE_TIMEOUT_SECS", 600)),
            },
            gemini: GeminiConfig {
                base_url: env_string("GEMINI_BASE_URL", &defaults.gemini.base_url),
                api_key: env_opt("GEMINI_API_KEY"),
                models,
                timeout: Duration::from_secs(env_parse("GEMINI_TIMEOUT_SECS", 120)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_backend_parsing() {
        assert_eq!("LOCAL".parse::<VoiceBackend>().unwrap(), VoiceBackend::Local);
        assert_eq!(" cloud ".parse::<VoiceBackend>().unwrap(), VoiceBackend::Cloud);
        assert!("gpu".parse::<VoiceBackend>().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("VOICE_BACKEND", "local");
        std::env::set_var("AVATAR_POLL_INTERVAL_SECS", "2");
        std::env::set_var("GEMINI_MODELS", "m1, m2,");
        let config = ProviderConfig::from_env();
        std::env::remove_var("VOICE_BACKEND");
        std::env::remove_var("AVATAR_POLL_INTERVAL_SECS");
        std::env::remove_var("GEMINI_MODELS");

        assert_eq!(config.backend, VoiceBackend::Local);
        assert_eq!(config.avatar.poll.interval, Duration::from_secs(2));
        assert_eq!(config.avatar.poll.max_attempts, 180);
        assert_eq!(config.gemini.models, vec!["m1", "m2"]);
        assert_eq!(config.avatar.max_audio_duration, Duration::from_secs(59));
    }
}
