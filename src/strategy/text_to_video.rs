use futures_util::future::BoxFuture;

use crate::error::RiptideError;
use crate::request::{GenerationMode, GenerationRequest};
use crate::strategy::{GenerationStrategy, seed_for};
use crate::upload::AssetUploader;

const DEFAULT_RESOLUTION: &str = "1280x720";
const DEFAULT_DURATION_SECS: u32 = 5;
const DEFAULT_FRAME_RATE: u32 = 24;

pub struct TextToVideoStrategy;

impl GenerationStrategy for TextToVideoStrategy {
    fn mode(&self) -> GenerationMode {
        GenerationMode::TextToVideo
    }

    fn requires_source_asset(&self) -> bool {
        false
    }

    fn requires_prompt(&self) -> bool {
        true
    }

    fn build_payload<'a>(
        &'a self,
        request: &'a GenerationRequest,
        _uploader: &'a AssetUploader,
    ) -> BoxFuture<'a, Result<serde_json::Value, RiptideError>> {
        Box::pin(async move {
            let settings = &request.settings;
            let mut payload = serde_json::json!({
                "mode": self.mode().as_str(),
                "prompt": request.trimmed_prompt().unwrap_or_default(),
                "resolution": settings.resolution.as_deref().unwrap_or(DEFAULT_RESOLUTION),
                "duration": settings.duration_secs.unwrap_or(DEFAULT_DURATION_SECS),
                "fps": settings.frame_rate.unwrap_or(DEFAULT_FRAME_RATE),
                "seed": seed_for(request),
            });
            if let Some(model) = &request.model {
                payload["model"] = serde_json::json!(model);
            }
            if let Some(style) = &settings.style {
                payload["style"] = serde_json::json!(style);
            }
            if let Some(negative) = &settings.negative_prompt {
                payload["negativePrompt"] = serde_json::json!(negative);
            }
            Ok(payload)
        })
    }
}
