use serde::{Deserialize, Serialize};

/// Generation mode selecting the payload-building strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationMode {
    TextToImage,
    ImageToImage,
    TextToVideo,
    ImageToVideo,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextToImage => "text-to-image",
            Self::ImageToImage => "image-to-image",
            Self::TextToVideo => "text-to-video",
            Self::ImageToVideo => "image-to-video",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::TextToVideo | Self::ImageToVideo)
    }
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source material for image-conditioned modes.
///
/// The two variants are the two resolution paths: raw bytes are uploaded
/// to the provider before payload assembly, while a remote reference is
/// passed through unchanged (after sanitization). A request carries at
/// most one of them by construction.
#[derive(Debug, Clone)]
pub enum SourceAsset {
    /// Raw bytes to upload first. `content_type` is forwarded as the
    /// upload's type context (e.g. "image/png").
    Bytes {
        data: Vec<u8>,
        content_type: String,
    },
    /// Pre-existing provider file id or absolute URL.
    Remote(String),
}

impl SourceAsset {
    pub fn bytes(data: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self::Bytes {
            data,
            content_type: content_type.into(),
        }
    }

    pub fn remote(reference: impl Into<String>) -> Self {
        Self::Remote(reference.into())
    }
}

/// Mode-specific settings bag. Everything is optional; strategies fill
/// provider defaults for what the caller leaves unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    /// Output resolution, e.g. "1024x1024" or "1920x1080".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// Named style preset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Clip length in seconds (video modes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
    /// Frames per second (video modes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<u32>,
    /// Sampling seed. Generated pseudo-randomly when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Number of outputs per job (image modes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
}

/// One media generation request, as handed to [`crate::GenerationClient::generate`].
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub mode: GenerationMode,
    /// Required for every mode except pure image-to-video animation.
    pub prompt: Option<String>,
    /// Provider model identifier. Omitted means the provider default.
    pub model: Option<String>,
    pub source: Option<SourceAsset>,
    pub settings: GenerationSettings,
}

impl GenerationRequest {
    pub fn new(mode: GenerationMode) -> Self {
        Self {
            mode,
            prompt: None,
            model: None,
            source: None,
            settings: GenerationSettings::default(),
        }
    }

    /// The prompt with surrounding whitespace stripped, if non-empty.
    pub fn trimmed_prompt(&self) -> Option<&str> {
        self.prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}
