mod image_to_image;
mod image_to_video;
mod text_to_image;
mod text_to_video;

pub use image_to_image::ImageToImageStrategy;
pub use image_to_video::ImageToVideoStrategy;
pub use text_to_image::TextToImageStrategy;
pub use text_to_video::TextToVideoStrategy;

use futures_util::future::BoxFuture;
use rand::Rng;

use crate::error::RiptideError;
use crate::request::{GenerationMode, GenerationRequest, SourceAsset};
use crate::upload::AssetUploader;

/// Exclusive upper bound of the provider's seed range.
const SEED_RANGE: u64 = 1_000_000_000_000;

/// Mode-specific payload builder and validator.
///
/// `build_payload` is asynchronous because image-bearing modes may have
/// to upload raw source bytes before the payload can reference them.
pub trait GenerationStrategy: Send + Sync {
    fn mode(&self) -> GenerationMode;

    /// Whether a resolvable source asset is mandatory for this mode.
    fn requires_source_asset(&self) -> bool;

    /// Whether a non-empty prompt is mandatory for this mode.
    fn requires_prompt(&self) -> bool;

    /// Check mode-specific requirements. Runs before any network call;
    /// a failure here means nothing was sent anywhere.
    fn validate(&self, request: &GenerationRequest) -> Result<(), RiptideError> {
        if self.requires_prompt() && request.trimmed_prompt().is_none() {
            return Err(RiptideError::Validation(format!(
                "{} requires a non-empty prompt",
                self.mode()
            )));
        }
        if self.requires_source_asset() {
            match &request.source {
                None => {
                    return Err(RiptideError::Validation(format!(
                        "{} requires a source image (raw bytes or a remote reference)",
                        self.mode()
                    )));
                }
                Some(SourceAsset::Bytes { data, .. }) if data.is_empty() => {
                    return Err(RiptideError::Validation(
                        "source image is empty (0 bytes)".into(),
                    ));
                }
                Some(SourceAsset::Remote(reference)) if reference.trim().is_empty() => {
                    return Err(RiptideError::Validation(
                        "source reference is empty".into(),
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Assemble the provider payload. Upload failures and missing upload
    /// identifiers abort the build, so no partial submission is sent.
    fn build_payload<'a>(
        &'a self,
        request: &'a GenerationRequest,
        uploader: &'a AssetUploader,
    ) -> BoxFuture<'a, Result<serde_json::Value, RiptideError>>;
}

/// Look up the strategy for a mode. Total over [`GenerationMode`]: the
/// closed enum replaces the unknown-key lookup a string-keyed registry
/// would need.
pub fn strategy_for(mode: GenerationMode) -> &'static dyn GenerationStrategy {
    match mode {
        GenerationMode::TextToImage => &TextToImageStrategy,
        GenerationMode::ImageToImage => &ImageToImageStrategy,
        GenerationMode::TextToVideo => &TextToVideoStrategy,
        GenerationMode::ImageToVideo => &ImageToVideoStrategy,
    }
}

/// The caller's seed if supplied, otherwise a pseudo-random one in the
/// provider's expected range.
pub fn seed_for(request: &GenerationRequest) -> u64 {
    request
        .settings
        .seed
        .unwrap_or_else(|| rand::rng().random_range(0..SEED_RANGE))
}

/// Sanitize a source reference before interpolating it into a payload:
/// strip control characters, normalize path separators, trim whitespace.
pub fn sanitize_reference(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if c == '\\' { '/' } else { c })
        .collect()
}

/// Resolve the request's source into a provider reference: raw bytes are
/// uploaded first, a remote id/URL passes through unchanged apart from
/// sanitization.
pub(crate) async fn resolve_source(
    request: &GenerationRequest,
    uploader: &AssetUploader,
) -> Result<String, RiptideError> {
    match &request.source {
        Some(SourceAsset::Bytes { data, content_type }) => {
            let uploaded = uploader
                .upload(data, content_type, request.mode.as_str())
                .await?;
            Ok(sanitize_reference(uploaded.reference()))
        }
        Some(SourceAsset::Remote(reference)) => Ok(sanitize_reference(reference)),
        None => Err(RiptideError::Validation(format!(
            "{} requires a source asset",
            request.mode
        ))),
    }
}
