use futures_util::future::BoxFuture;

use crate::error::RiptideError;
use crate::request::{GenerationMode, GenerationRequest};
use crate::strategy::{GenerationStrategy, seed_for};
use crate::upload::AssetUploader;

const DEFAULT_RESOLUTION: &str = "1024x1024";
const DEFAULT_BATCH_SIZE: u32 = 1;

pub struct TextToImageStrategy;

impl GenerationStrategy for TextToImageStrategy {
    fn mode(&self) -> GenerationMode {
        GenerationMode::TextToImage
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
                "batchSize": settings.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
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
