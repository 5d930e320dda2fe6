//! Speaker, voice and avatar configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Pixel rectangle `[x1, y1, x2, y2]` in the avatar source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }
}

impl From<[u32; 4]> for BoundingBox {
    fn from(v: [u32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [u32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// Avatar identity used for lip-synced video synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct AvatarRef {
    /// Avatar identity ID
    #[validate(length(min = 1, message = "avatar_id must not be empty"))]
    pub avatar_id: String,

    /// Publicly reachable source image
    #[validate(url(message = "avatar image_url must be a URL"))]
    pub image_url: String,

    /// Face rectangle in the source image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<[u32; 4]>")]
    pub face_bbox: Option<BoundingBox>,

    /// Extended crop rectangle around the face
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<[u32; 4]>")]
    pub ext_bbox: Option<BoundingBox>,
}

/// Per-speaker generation settings for a job.
///
/// A job with one config and no `speaker_label` is single-speaker: the
/// config applies to every segment regardless of attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct SpeakerConfig {
    /// Speaker label from story analysis; `None` matches every segment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_label: Option<String>,

    /// Cloned voice identity
    #[validate(length(min = 1, message = "voice_id must not be empty"))]
    pub voice_id: String,

    /// Optional avatar identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub avatar: Option<AvatarRef>,

    /// Disabled speakers keep their original lines silent
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SpeakerConfig {
    /// Single-speaker config for `voice_id`.
    pub fn narrator(voice_id: impl Into<String>) -> Self {
        Self {
            speaker_label: None,
            voice_id: voice_id.into(),
            avatar: None,
            enabled: true,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.speaker_label = Some(label.into());
        self
    }

    pub fn with_avatar(mut self, avatar: AvatarRef) -> Self {
        self.avatar = Some(avatar);
        self
    }

    /// Whether a segment attributed to `speaker` belongs to this config.
    pub fn matches(&self, speaker: Option<&str>) -> bool {
        match (&self.speaker_label, speaker) {
            (None, _) => true,
            (Some(label), Some(s)) => label == s,
            (Some(_), None) => false,
        }
    }

    /// Label for logs and artifact keys.
    pub fn display_label(&self) -> &str {
        self.speaker_label.as_deref().unwrap_or("narrator")
    }
}
