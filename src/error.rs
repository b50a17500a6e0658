use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiptideError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("asset upload failed: {0}")]
    Upload(String),

    #[error("submission rejected with HTTP {status}: {body}")]
    Submission { status: u16, body: String },

    #[error("no job identifier in provider response")]
    MissingJobId,

    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("generation job failed: {0}")]
    JobFailed(String),

    #[error("status polling failed for job {job_id}: {message}")]
    PollFailed { job_id: String, message: String },

    #[error("timed out after {elapsed_secs}s ({attempts} status checks)")]
    Timeout { elapsed_secs: u64, attempts: u32 },

    #[error("completion event channel closed: {0}")]
    ChannelClosed(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("parse error: {0}")]
    Parse(String),
}

impl RiptideError {
    /// Returns true for transient errors that may succeed on retry.
    /// The poller counts these toward its consecutive-error ceiling;
    /// everything else terminates the loop immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Request(_) => true, // connection errors may be transient
            Self::Submission { status, .. } => *status >= 500,
            Self::PollFailed { .. } => true,
            _ => false,
        }
    }

    /// Produce a sanitized message safe for end users.
    /// Does not leak provider error bodies, internal URLs, or job ids.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::Upload(msg) => format!("asset upload failed: {msg}"),
            Self::Submission { status, .. } => {
                format!("the provider rejected the generation request (HTTP {status})")
            }
            Self::MissingJobId => {
                "the provider accepted the request but returned no job identifier".to_string()
            }
            Self::RateLimited { .. } => {
                "rate limited by the provider, try again shortly".to_string()
            }
            Self::JobFailed(msg) => format!("generation failed: {msg}"),
            Self::PollFailed { .. } => {
                "unable to confirm generation status after repeated errors".to_string()
            }
            Self::Timeout {
                elapsed_secs,
                attempts,
            } => format!("generation timed out after {elapsed_secs}s ({attempts} status checks)"),
            Self::ChannelClosed(_) => "lost the completion event stream".to_string(),
            Self::Request(_) => "request to provider failed".to_string(),
            Self::Parse(_) => "failed to parse provider response".to_string(),
        }
    }
}
