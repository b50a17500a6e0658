use serde::{Deserialize, Serialize};

use crate::request::{GenerationMode, GenerationSettings};

/// Lifecycle status of a generation artifact.
///
/// `Completed` and `Error` are terminal: once either is set the
/// reconciler accepts no further writes for that job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    /// No generation request issued yet.
    Idle,
    /// Request accepted locally; validating, uploading, building payload.
    Preparing,
    /// Submitted to the provider; generation in progress.
    Generating,
    /// Provider tasks finished but the asset is not resolved yet.
    Processing,
    Completed,
    Error,
}

impl ArtifactStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// What the artifact displays: the request snapshot plus, once
/// resolved, the asset location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactContent {
    pub mode: GenerationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(flatten)]
    pub settings: GenerationSettings,
    /// Set exactly once, by the winning completion proposal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// The record a user observes for one generation request.
///
/// Owned and mutated exclusively by [`crate::reconcile::Reconciler`];
/// everything else reads snapshots or watches for changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactState {
    pub status: ArtifactStatus,
    pub content: ArtifactContent,
    /// Provider-issued correlation key. Absent until submission is
    /// accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Client-issued id, stable across the whole request lifecycle.
    pub request_id: String,
    /// Human-readable explanation for terminal error states.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ArtifactState {
    pub fn new(request_id: impl Into<String>, mode: GenerationMode) -> Self {
        Self {
            status: ArtifactStatus::Idle,
            content: ArtifactContent {
                mode,
                prompt: None,
                settings: GenerationSettings::default(),
                asset_url: None,
                thumbnail_url: None,
            },
            job_id: None,
            request_id: request_id.into(),
            message: None,
        }
    }

    /// True once a completion has been applied: terminal status plus a
    /// resolved asset URL.
    pub fn is_resolved(&self) -> bool {
        self.status == ArtifactStatus::Completed
            && self.content.asset_url.as_deref().is_some_and(|u| !u.is_empty())
    }
}
