use futures_util::future::BoxFuture;

use crate::error::RiptideError;
use crate::request::{GenerationMode, GenerationRequest};
use crate::strategy::{GenerationStrategy, resolve_source, seed_for};
use crate::upload::AssetUploader;

const DEFAULT_BATCH_SIZE: u32 = 1;

pub struct ImageToImageStrategy;

impl GenerationStrategy for ImageToImageStrategy {
    fn mode(&self) -> GenerationMode {
        GenerationMode::ImageToImage
    }

    fn requires_source_asset(&self) -> bool {
        true
    }

    fn requires_prompt(&self) -> bool {
        true
    }

    fn build_payload<'a>(
        &'a self,
        request: &'a GenerationRequest,
        uploader: &'a AssetUploader,
    ) -> BoxFuture<'a, Result<serde_json::Value, RiptideError>> {
        Box::pin(async move {
            // Upload (or pass through) before assembling anything, so an
            // upload failure aborts with no partial submission.
            let source = resolve_source(request, uploader).await?;

            let settings = &request.settings;
            let mut payload = serde_json::json!({
                "mode": self.mode().as_str(),
                "prompt": request.trimmed_prompt().unwrap_or_default(),
                "sourceImage": source,
                "batchSize": settings.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
                "seed": seed_for(request),
            });
            if let Some(model) = &request.model {
                payload["model"] = serde_json::json!(model);
            }
            // Omitted resolution means "match the source image".
            if let Some(resolution) = &settings.resolution {
                payload["resolution"] = serde_json::json!(resolution);
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
