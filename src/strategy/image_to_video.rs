use futures_util::future::BoxFuture;

use crate::error::RiptideError;
use crate::request::{GenerationMode, GenerationRequest};
use crate::strategy::{GenerationStrategy, resolve_source, seed_for};
use crate::upload::AssetUploader;

const DEFAULT_DURATION_SECS: u32 = 5;
const DEFAULT_FRAME_RATE: u32 = 24;

/// Animates a source image into a clip. The prompt is optional: with no
/// prompt the provider animates the image as-is.
pub struct ImageToVideoStrategy;

impl GenerationStrategy for ImageToVideoStrategy {
    fn mode(&self) -> GenerationMode {
        GenerationMode::ImageToVideo
    }

    fn requires_source_asset(&self) -> bool {
        true
    }

    fn requires_prompt(&self) -> bool {
        false
    }

    fn build_payload<'a>(
        &'a self,
        request: &'a GenerationRequest,
        uploader: &'a AssetUploader,
    ) -> BoxFuture<'a, Result<serde_json::Value, RiptideError>> {
        Box::pin(async move {
            let source = resolve_source(request, uploader).await?;

            let settings = &request.settings;
            let mut payload = serde_json::json!({
                "mode": self.mode().as_str(),
                "sourceImage": source,
                "duration": settings.duration_secs.unwrap_or(DEFAULT_DURATION_SECS),
                "fps": settings.frame_rate.unwrap_or(DEFAULT_FRAME_RATE),
                "seed": seed_for(request),
            });
            if let Some(prompt) = request.trimmed_prompt() {
                payload["prompt"] = serde_json::json!(prompt);
            }
            if let Some(model) = &request.model {
                payload["model"] = serde_json::json!(model);
            }
            if let Some(resolution) = &settings.resolution {
                payload["resolution"] = serde_json::json!(resolution);
            }
            if let Some(negative) = &settings.negative_prompt {
                payload["negativePrompt"] = serde_json::json!(negative);
            }
            Ok(payload)
        })
    }
}
