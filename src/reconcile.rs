//! Terminal-outcome reconciliation.
//!
//! Push events and polling race to finish the same job. The
//! [`Reconciler`] owns every tracked [`ArtifactState`] and guarantees
//! exactly one terminal write per key: the first completion or error
//! proposal claims the job, later proposals are dropped, and the losing
//! channel is cancelled synchronously inside the winning call.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::artifact::{ArtifactState, ArtifactStatus};
use crate::request::GenerationRequest;

struct ArtifactEntry {
    state: ArtifactState,
    /// Set by the first terminal write and never cleared.
    claimed: bool,
    notify: watch::Sender<ArtifactState>,
    teardowns: Vec<CancellationToken>,
}

impl ArtifactEntry {
    fn publish(&mut self) {
        self.notify.send_replace(self.state.clone());
    }

    fn fire_teardowns(&mut self) {
        for teardown in self.teardowns.drain(..) {
            teardown.cancel();
        }
    }
}

/// Artifact registry keyed by request id before submission is accepted
/// and by job id afterwards.
#[derive(Default)]
pub struct Reconciler {
    artifacts: Mutex<HashMap<String, ArtifactEntry>>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, ArtifactEntry>> {
        self.artifacts.lock().expect("artifact registry lock poisoned")
    }

    /// Track a new artifact for `request`. The returned receiver observes
    /// every state change, the rekey on promotion included.
    pub fn register(&self, request_id: &str, request: &GenerationRequest) -> watch::Receiver<ArtifactState> {
        let mut state = ArtifactState::new(request_id, request.mode);
        state.content.prompt = request.trimmed_prompt().map(str::to_string);
        state.content.settings = request.settings.clone();

        let (notify, receiver) = watch::channel(state.clone());
        let entry = ArtifactEntry {
            state,
            claimed: false,
            notify,
            teardowns: Vec::new(),
        };
        let mut entries = self.entries();
        if entries.insert(request_id.to_string(), entry).is_some() {
            tracing::debug!(request_id, "replaced an existing artifact registration");
        }
        receiver
    }

    /// Rekey `request_id` to the provider-issued `job_id` after an
    /// accepted submission and move the artifact to `Generating`.
    pub fn promote(&self, request_id: &str, job_id: &str, message: Option<String>) -> bool {
        let mut entries = self.entries();
        let Some(mut entry) = entries.remove(request_id) else {
            tracing::warn!(request_id, job_id, "promotion for untracked artifact");
            return false;
        };
        entry.state.job_id = Some(job_id.to_string());
        entry.state.status = ArtifactStatus::Generating;
        entry.state.message = message;
        entry.publish();
        if entries.insert(job_id.to_string(), entry).is_some() {
            tracing::debug!(job_id, "promotion replaced an existing artifact entry");
        }
        true
    }

    /// Apply a non-terminal status. Writes after a terminal claim are
    /// dropped.
    pub fn update_status(&self, key: &str, status: ArtifactStatus, message: Option<String>) {
        if status.is_terminal() {
            tracing::warn!(key, ?status, "terminal statuses go through propose_completion or mark_error");
            return;
        }
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            tracing::debug!(key, "status update for untracked artifact");
            return;
        };
        if entry.claimed {
            tracing::debug!(key, ?status, "ignoring status update after terminal outcome");
            return;
        }
        entry.state.status = status;
        entry.state.message = message;
        entry.publish();
    }

    /// Register a token to cancel when the job reaches a terminal state.
    /// If the job already has one, the token fires immediately.
    pub fn add_teardown(&self, job_id: &str, token: CancellationToken) {
        let mut entries = self.entries();
        match entries.get_mut(job_id) {
            Some(entry) if entry.claimed => token.cancel(),
            Some(entry) => entry.teardowns.push(token),
            None => {
                tracing::warn!(job_id, "teardown registered for untracked job");
                token.cancel();
            }
        }
    }

    /// Propose a completion observed by `origin` (push or poll). The
    /// first proposal per job wins: it writes `Completed` with the asset
    /// URL, notifies observers, and cancels the losing channel before
    /// returning. Later proposals return false.
    pub fn propose_completion(
        &self,
        job_id: &str,
        asset_url: &str,
        thumbnail_url: Option<&str>,
        origin: &str,
    ) -> bool {
        if asset_url.is_empty() {
            tracing::warn!(job_id, origin, "ignoring completion proposal with empty asset url");
            return false;
        }
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(job_id) else {
            tracing::warn!(job_id, origin, "completion proposal for untracked job");
            return false;
        };
        if entry.claimed {
            tracing::debug!(job_id, origin, "duplicate completion proposal ignored");
            return false;
        }
        entry.claimed = true;
        entry.state.status = ArtifactStatus::Completed;
        entry.state.content.asset_url = Some(asset_url.to_string());
        entry.state.content.thumbnail_url = thumbnail_url.map(str::to_string);
        entry.state.message = None;
        entry.publish();
        entry.fire_teardowns();
        tracing::info!(job_id, origin, "completion applied");
        true
    }

    /// Record a terminal failure. Claims the same per-job flag as
    /// completions, so an error can neither overwrite a completion nor
    /// be overwritten by a late one.
    pub fn mark_error(&self, key: &str, message: impl Into<String>, origin: &str) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            tracing::warn!(key, origin, "error report for untracked artifact");
            return false;
        };
        if entry.claimed {
            tracing::debug!(key, origin, "terminal outcome already applied, dropping error");
            return false;
        }
        let message = message.into();
        entry.claimed = true;
        entry.state.status = ArtifactStatus::Error;
        entry.state.message = Some(message.clone());
        entry.publish();
        entry.fire_teardowns();
        tracing::warn!(key, origin, "artifact failed: {message}");
        true
    }

    /// Snapshot of a tracked artifact.
    pub fn artifact(&self, key: &str) -> Option<ArtifactState> {
        self.entries().get(key).map(|entry| entry.state.clone())
    }

    /// Watch a tracked artifact for state changes.
    pub fn watch(&self, key: &str) -> Option<watch::Receiver<ArtifactState>> {
        self.entries().get(key).map(|entry| entry.notify.subscribe())
    }

    /// Stop tracking an artifact. Cancels any teardown tokens still
    /// registered, so discarding an in-flight job also stops its
    /// completion channels.
    pub fn discard(&self, key: &str) -> bool {
        let mut entries = self.entries();
        match entries.remove(key) {
            Some(mut entry) => {
                entry.fire_teardowns();
                tracing::debug!(key, "artifact discarded");
                true
            }
            None => false,
        }
    }

    pub fn tracked(&self) -> usize {
        self.entries().len()
    }
}
