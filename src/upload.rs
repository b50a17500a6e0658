use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::error::RiptideError;

/// Upper bound on source asset size accepted for upload.
pub const MAX_ASSET_BYTES: usize = 50 * 1024 * 1024; // 50MB

/// Cap on error body reads so a misbehaving endpoint cannot balloon
/// error values.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Provider file reference returned by the upload endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedAsset {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl UploadedAsset {
    /// The reference to interpolate into payloads: the URL when the
    /// provider returned one, the file id otherwise.
    pub fn reference(&self) -> &str {
        self.url.as_deref().filter(|u| !u.is_empty()).unwrap_or(&self.id)
    }
}

/// Uploads raw source bytes ahead of payload assembly.
pub struct AssetUploader {
    client: Client,
    config: Arc<ProviderConfig>,
}

impl AssetUploader {
    pub fn new(client: Client, config: Arc<ProviderConfig>) -> Self {
        Self { client, config }
    }

    /// Upload `data` and return the provider's file reference.
    ///
    /// Size bounds are enforced here, before any network call: empty
    /// payloads and payloads over [`MAX_ASSET_BYTES`] are rejected.
    pub async fn upload(
        &self,
        data: &[u8],
        content_type: &str,
        scope: &str,
    ) -> Result<UploadedAsset, RiptideError> {
        if data.is_empty() {
            return Err(RiptideError::Upload("source asset is empty (0 bytes)".into()));
        }
        if data.len() > MAX_ASSET_BYTES {
            return Err(RiptideError::Upload(format!(
                "source asset is {} bytes (max {MAX_ASSET_BYTES})",
                data.len()
            )));
        }

        let response = self
            .client
            .post(self.config.upload_url())
            .query(&[("type", content_type), ("scope", scope)])
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", content_type)
            .body(data.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_bytes = response.bytes().await.unwrap_or_default();
            let truncated = &error_bytes[..error_bytes.len().min(MAX_ERROR_BODY_BYTES)];
            let text = String::from_utf8_lossy(truncated);
            tracing::warn!(status = status.as_u16(), "asset upload rejected");
            return Err(RiptideError::Upload(format!("HTTP {status}: {text}")));
        }

        let uploaded: UploadedAsset = response
            .json()
            .await
            .map_err(|e| RiptideError::Parse(format!("upload response: {e}")))?;

        if uploaded.id.trim().is_empty() {
            return Err(RiptideError::Upload(
                "upload response missing file identifier".into(),
            ));
        }

        tracing::debug!(
            file_id = %uploaded.id,
            bytes = data.len(),
            "source asset uploaded"
        );
        Ok(uploaded)
    }
}
