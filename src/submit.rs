use std::sync::Arc;

use reqwest::Client;
use serde_json::Value;

use crate::config::ProviderConfig;
use crate::error::RiptideError;
use crate::request::GenerationMode;

/// Cap on error body reads from the generation endpoint.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Outcome of one submission attempt. A value in both arms: submission
/// never raises across this boundary, so callers branch on the variant
/// instead of catching.
#[derive(Debug)]
pub enum SubmissionResult {
    Accepted {
        /// Provider-issued correlation key for both completion channels.
        job_id: String,
        request_id: String,
        /// Provider acknowledgement text, when present.
        message: Option<String>,
    },
    Rejected {
        request_id: String,
        error: RiptideError,
    },
}

impl SubmissionResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Accepted { job_id, .. } => Some(job_id),
            Self::Rejected { .. } => None,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Self::Accepted { request_id, .. } | Self::Rejected { request_id, .. } => request_id,
        }
    }

    pub fn error(&self) -> Option<&RiptideError> {
        match self {
            Self::Accepted { .. } => None,
            Self::Rejected { error, .. } => Some(error),
        }
    }
}

/// Sends strategy-built payloads to the provider's generation endpoint
/// and normalizes its divergent response shapes.
pub struct SubmissionClient {
    client: Client,
    config: Arc<ProviderConfig>,
}

impl SubmissionClient {
    pub fn new(client: Client, config: Arc<ProviderConfig>) -> Self {
        Self { client, config }
    }

    /// Submit a built payload. `request_id` is the caller's correlation
    /// id, echoed back on both arms of the result.
    pub async fn submit(
        &self,
        mode: GenerationMode,
        payload: &Value,
        request_id: &str,
    ) -> SubmissionResult {
        match self.send(payload).await {
            Ok((job_id, message)) => {
                tracing::info!(%mode, job_id = %job_id, request_id, "generation job submitted");
                SubmissionResult::Accepted {
                    job_id,
                    request_id: request_id.to_string(),
                    message,
                }
            }
            Err(error) => {
                tracing::warn!(%mode, request_id, "submission failed: {error}");
                SubmissionResult::Rejected {
                    request_id: request_id.to_string(),
                    error,
                }
            }
        }
    }

    async fn send(&self, payload: &Value) -> Result<(String, Option<String>), RiptideError> {
        let response = self
            .client
            .post(self.config.generate_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_bytes = response.bytes().await.unwrap_or_default();
            let truncated = &error_bytes[..error_bytes.len().min(MAX_ERROR_BODY_BYTES)];
            return Err(RiptideError::Submission {
                status: status.as_u16(),
                body: String::from_utf8_lossy(truncated).to_string(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RiptideError::Parse(format!("submission response: {e}")))?;

        let job_id = extract_job_id(&body).ok_or(RiptideError::MissingJobId)?;
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok((job_id, message))
    }
}

// ---------------------------------------------------------------------------
// Response-shape extractors
// ---------------------------------------------------------------------------
//
// The provider returns the job identifier in one of several shapes.
// Each shape gets its own extractor; they run in fixed priority order
// and the first match wins, so the guessing stays auditable.

type IdExtractor = fn(&Value) -> Option<String>;

const ID_EXTRACTORS: &[IdExtractor] = &[
    extract_top_level,
    extract_first_array_element,
    extract_under_result,
    extract_under_data,
];

/// Try every known response shape in priority order.
pub fn extract_job_id(body: &Value) -> Option<String> {
    ID_EXTRACTORS.iter().find_map(|extract| extract(body))
}

/// `{"id": "..."}`; also tolerates numeric ids.
fn extract_top_level(body: &Value) -> Option<String> {
    body.get("id").and_then(value_as_id)
}

/// `["...", ...]` or `[{"id": "..."}, ...]`.
fn extract_first_array_element(body: &Value) -> Option<String> {
    let first = body.as_array()?.first()?;
    value_as_id(first).or_else(|| first.get("id").and_then(value_as_id))
}

/// `{"result": "..."}` or `{"result": {"id": "..."}}`.
fn extract_under_result(body: &Value) -> Option<String> {
    nested_id(body.get("result")?)
}

/// `{"data": ...}` with the same nesting options as `result`.
fn extract_under_data(body: &Value) -> Option<String> {
    nested_id(body.get("data")?)
}

fn nested_id(container: &Value) -> Option<String> {
    value_as_id(container)
        .or_else(|| container.get("id").and_then(value_as_id))
        .or_else(|| extract_first_array_element(container))
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
