use std::env;
use std::time::Duration;

/// Default wall-clock budget for resolving one job.
pub const DEFAULT_MAX_POLL_DURATION: Duration = Duration::from_secs(7 * 60);

/// Default interval before the first poll step-up.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(1);

/// Default cap on the inter-attempt interval.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(10);

/// Default interval multiplier applied after a transient checker error.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default ceiling on consecutive non-rate-limit checker errors.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Default delay before fallback polling starts, letting the push
/// channel win the common case.
pub const DEFAULT_POLL_GRACE_DELAY: Duration = Duration::from_secs(30);

/// Remote generation provider endpoints and credentials.
///
/// Paths are joined onto `base_url`; override them for providers that
/// mount the API somewhere else.
#[derive(Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub generate_path: String,
    pub upload_path: String,
    pub file_status_path: String,
    pub project_status_path: String,
    pub events_path: String,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            api_key: api_key.into(),
            generate_path: "/v1/generations".to_string(),
            upload_path: "/v1/uploads".to_string(),
            file_status_path: "/v1/files".to_string(),
            project_status_path: "/v1/projects".to_string(),
            events_path: "/v1/events".to_string(),
        }
    }

    /// Build from `RIPTIDE_API_BASE` and `RIPTIDE_API_KEY`.
    /// Returns None (with a warning) when either is unset.
    pub fn from_env() -> Option<Self> {
        let base = match env::var("RIPTIDE_API_BASE") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => {
                tracing::warn!("RIPTIDE_API_BASE not set, provider unavailable");
                return None;
            }
        };
        let key = match env::var("RIPTIDE_API_KEY") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => {
                tracing::warn!("RIPTIDE_API_KEY not set, provider unavailable");
                return None;
            }
        };
        Some(Self::new(base, key))
    }

    pub fn generate_url(&self) -> String {
        format!("{}{}", self.base_url, self.generate_path)
    }

    pub fn upload_url(&self) -> String {
        format!("{}{}", self.base_url, self.upload_path)
    }

    pub fn file_status_url(&self, file_id: &str) -> String {
        format!("{}{}/{file_id}", self.base_url, self.file_status_path)
    }

    pub fn project_status_url(&self, project_id: &str) -> String {
        format!("{}{}/{project_id}", self.base_url, self.project_status_path)
    }

    pub fn events_url(&self, channel: &str) -> String {
        format!("{}{}?channel={channel}", self.base_url, self.events_path)
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("generate_path", &self.generate_path)
            .field("upload_path", &self.upload_path)
            .field("file_status_path", &self.file_status_path)
            .field("project_status_path", &self.project_status_path)
            .field("events_path", &self.events_path)
            .finish()
    }
}

/// Tunable parameters for the adaptive poller and completion tracking.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Hard wall-clock budget measured from poll start. Exceeding it is
    /// a timeout outcome, not an error.
    pub max_duration: Duration,
    /// Interval before the first step-up.
    pub initial_interval: Duration,
    /// Upper bound on the inter-attempt interval.
    pub max_interval: Duration,
    /// Factor applied to the current interval after a transient error.
    pub backoff_multiplier: f64,
    /// Consecutive non-rate-limit errors tolerated before giving up.
    pub max_consecutive_errors: u32,
    /// Delay before fallback polling starts when tracking a job.
    pub grace_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_duration: DEFAULT_MAX_POLL_DURATION,
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            grace_delay: DEFAULT_POLL_GRACE_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_stripped() {
        let config = ProviderConfig::new("https://api.example.com/", "k");
        assert_eq!(config.generate_url(), "https://api.example.com/v1/generations");
        assert_eq!(
            config.file_status_url("f-1"),
            "https://api.example.com/v1/files/f-1"
        );
        assert_eq!(
            config.events_url("job-9"),
            "https://api.example.com/v1/events?channel=job-9"
        );
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = ProviderConfig::new("https://api.example.com", "sk-secret");
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-secret"));
    }

    #[test]
    fn poll_defaults_match_documented_values() {
        let config = PollConfig::default();
        assert_eq!(config.max_duration, Duration::from_secs(420));
        assert_eq!(config.initial_interval, Duration::from_secs(1));
        assert_eq!(config.max_interval, Duration::from_secs(10));
        assert_eq!(config.max_consecutive_errors, 5);
        assert_eq!(config.grace_delay, Duration::from_secs(30));
    }
}
