//! Concrete [`StatusChecker`] implementations for the two provider
//! status surfaces: per-file lookups and project-wide listings.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::error::RiptideError;
use crate::poll::{CompletionData, StatusCheck, StatusChecker};

/// Task status the provider uses for unrecoverable failures.
pub const ERROR_MARKER: &str = "ERROR";

fn task_finished(status: &str) -> bool {
    matches!(status, "SUCCESS" | "SUCCEEDED" | "COMPLETED" | "DONE")
}

/// Parse a Retry-After header as integer seconds. HTTP-date forms are
/// ignored.
fn retry_after_hint(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// --- file status ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatusResponse {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "thumbnail_url")]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub tasks: Option<Vec<TaskState>>,
}

#[derive(Debug, Deserialize)]
pub struct TaskState {
    #[serde(default)]
    pub status: String,
}

/// Interpret a file-status body. A ready asset URL wins; an ERROR task
/// is unrecoverable; anything else keeps polling.
pub fn evaluate_file_status(response: &FileStatusResponse) -> StatusCheck {
    if let Some(url) = response.url.as_deref().filter(|u| !u.is_empty()) {
        return StatusCheck::complete(CompletionData {
            asset_url: url.to_string(),
            thumbnail_url: response.thumbnail_url.clone(),
        });
    }
    if let Some(tasks) = &response.tasks
        && tasks.iter().any(|t| t.status == ERROR_MARKER)
    {
        return StatusCheck::fail("generation task reported ERROR");
    }
    StatusCheck::pending()
}

/// Polls a single file record until its asset URL appears.
pub struct FileStatusChecker {
    client: Client,
    config: Arc<ProviderConfig>,
    file_id: String,
}

impl FileStatusChecker {
    pub fn new(client: Client, config: Arc<ProviderConfig>, file_id: impl Into<String>) -> Self {
        Self {
            client,
            config,
            file_id: file_id.into(),
        }
    }
}

impl StatusChecker for FileStatusChecker {
    async fn check(&mut self) -> Result<StatusCheck, RiptideError> {
        let response = self
            .client
            .get(self.config.file_status_url(&self.file_id))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .send()
            .await?;

        match response.status() {
            // The file record can lag the job acceptance.
            StatusCode::NOT_FOUND => {
                tracing::debug!(file_id = %self.file_id, "file status 404, record not visible yet");
                Ok(StatusCheck::pending())
            }
            StatusCode::TOO_MANY_REQUESTS => Err(RiptideError::RateLimited {
                retry_after: retry_after_hint(&response),
            }),
            status if !status.is_success() => Err(RiptideError::PollFailed {
                job_id: self.file_id.clone(),
                message: format!("file status returned HTTP {status}"),
            }),
            _ => {
                let body: FileStatusResponse = response
                    .json()
                    .await
                    .map_err(|e| RiptideError::Parse(format!("file status body: {e}")))?;
                Ok(evaluate_file_status(&body))
            }
        }
    }
}

// --- project status ---

#[derive(Debug, Deserialize)]
pub struct ProjectStatusResponse {
    #[serde(default)]
    pub data: Option<Vec<ProjectDatum>>,
    #[serde(default)]
    pub tasks: Option<Vec<TaskState>>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectDatum {
    #[serde(default)]
    pub value: Option<MediaValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaValue {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "thumbnail_url")]
    pub thumbnail_url: Option<String>,
}

/// Interpret a project-status body. `expected_kind` narrows which media
/// entries count as this job's output; `None` accepts any ready media.
pub fn evaluate_project_status(
    response: &ProjectStatusResponse,
    expected_kind: Option<&str>,
) -> StatusCheck {
    for datum in response.data.as_deref().unwrap_or_default() {
        let Some(value) = &datum.value else { continue };
        let Some(url) = value.url.as_deref().filter(|u| !u.is_empty()) else {
            continue;
        };
        if expected_kind.is_none_or(|k| value.kind.as_deref() == Some(k)) {
            return StatusCheck::complete(CompletionData {
                asset_url: url.to_string(),
                thumbnail_url: value.thumbnail_url.clone(),
            });
        }
    }

    let tasks = response.tasks.as_deref().unwrap_or_default();
    if tasks.iter().any(|t| t.status == ERROR_MARKER) {
        return StatusCheck::fail("a generation task reported ERROR");
    }
    if tasks
        .iter()
        .any(|t| t.status != ERROR_MARKER && !task_finished(&t.status))
    {
        return StatusCheck::pending();
    }
    StatusCheck::pending_with_note("no media ready and no tasks in flight, possible stall")
}

/// Polls a project listing until media matching the expected kind shows
/// up. Used when a submission yields a project id rather than a file id.
pub struct ProjectStatusChecker {
    client: Client,
    config: Arc<ProviderConfig>,
    project_id: String,
    expected_kind: Option<String>,
}

impl ProjectStatusChecker {
    pub fn new(
        client: Client,
        config: Arc<ProviderConfig>,
        project_id: impl Into<String>,
        expected_kind: Option<String>,
    ) -> Self {
        Self {
            client,
            config,
            project_id: project_id.into(),
            expected_kind,
        }
    }
}

impl StatusChecker for ProjectStatusChecker {
    async fn check(&mut self) -> Result<StatusCheck, RiptideError> {
        let response = self
            .client
            .get(self.config.project_status_url(&self.project_id))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => Err(RiptideError::RateLimited {
                retry_after: retry_after_hint(&response),
            }),
            status if !status.is_success() => Err(RiptideError::PollFailed {
                job_id: self.project_id.clone(),
                message: format!("project status returned HTTP {status}"),
            }),
            _ => {
                let body: ProjectStatusResponse = response
                    .json()
                    .await
                    .map_err(|e| RiptideError::Parse(format!("project status body: {e}")))?;
                Ok(evaluate_project_status(&body, self.expected_kind.as_deref()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_status(json: serde_json::Value) -> FileStatusResponse {
        serde_json::from_value(json).unwrap()
    }

    fn project_status(json: serde_json::Value) -> ProjectStatusResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn file_url_wins_over_task_states() {
        let response = file_status(serde_json::json!({
            "url": "https://cdn.example/out.png",
            "thumbnailUrl": "https://cdn.example/out_thumb.png",
            "tasks": [{"status": "RUNNING"}]
        }));
        let check = evaluate_file_status(&response);
        assert!(check.completed);
        assert_eq!(
            check.data.unwrap().thumbnail_url.as_deref(),
            Some("https://cdn.example/out_thumb.png")
        );
    }

    #[test]
    fn file_error_task_is_unrecoverable() {
        let response = file_status(serde_json::json!({
            "tasks": [{"status": "SUCCESS"}, {"status": "ERROR"}]
        }));
        let check = evaluate_file_status(&response);
        assert!(!check.completed);
        assert!(!check.should_continue);
    }

    #[test]
    fn file_empty_url_keeps_polling() {
        let response = file_status(serde_json::json!({"url": ""}));
        let check = evaluate_file_status(&response);
        assert!(!check.completed);
        assert!(check.should_continue);
    }

    #[test]
    fn project_media_must_match_expected_kind() {
        let response = project_status(serde_json::json!({
            "data": [
                {"value": {"kind": "image", "url": "https://cdn.example/a.png"}},
                {"value": {"kind": "video", "url": "https://cdn.example/a.mp4"}}
            ]
        }));
        let check = evaluate_project_status(&response, Some("video"));
        assert!(check.completed);
        assert_eq!(check.data.unwrap().asset_url, "https://cdn.example/a.mp4");
    }

    #[test]
    fn project_in_flight_tasks_keep_polling_quietly() {
        let response = project_status(serde_json::json!({
            "tasks": [{"status": "PENDING"}]
        }));
        let check = evaluate_project_status(&response, None);
        assert!(check.should_continue);
        assert!(check.error.is_none());
    }

    #[test]
    fn project_stall_is_flagged_but_not_fatal() {
        let response = project_status(serde_json::json!({
            "tasks": [{"status": "SUCCESS"}]
        }));
        let check = evaluate_project_status(&response, None);
        assert!(check.should_continue);
        assert!(check.error.is_some());
    }
}
