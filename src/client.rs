//! Client facade wiring the request pipeline to completion tracking.
//!
//! [`GenerationClient`] owns one HTTP client and the shared machinery:
//! uploader, submitter, poll manager, completion feed, and reconciler.
//! `generate` runs the request pipeline; `track_completion` races push
//! events against fallback polling and resolves to the single terminal
//! state the reconciler applied.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::artifact::{ArtifactState, ArtifactStatus};
use crate::config::{PollConfig, ProviderConfig};
use crate::error::RiptideError;
use crate::events::CompletionFeed;
use crate::poll::checkers::{FileStatusChecker, ProjectStatusChecker};
use crate::poll::{PollManager, PollOutcome};
use crate::reconcile::Reconciler;
use crate::request::GenerationRequest;
use crate::strategy::strategy_for;
use crate::submit::{SubmissionClient, SubmissionResult};
use crate::upload::AssetUploader;

/// Event channel used when tracking is not project-scoped.
const DEFAULT_EVENTS_CHANNEL: &str = "generations";

/// Headroom the tracking backstop leaves a fallback poller to report its
/// own timeout before the backstop fires.
const POLL_REPORT_MARGIN: Duration = Duration::from_secs(2);

/// Which status surface fallback polling reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackScope {
    /// Poll the job's file record directly.
    File,
    /// Poll a project listing; media is matched by the job's kind and
    /// push events arrive on the project's channel.
    Project { project_id: String },
}

/// Per-job completion tracking switches.
#[derive(Debug, Clone)]
pub struct TrackOptions {
    /// Listen for push completions over the event stream.
    pub use_events: bool,
    /// Poll job status as a fallback. Starts after a grace delay when
    /// push events are also enabled, immediately otherwise.
    pub use_fallback_polling: bool,
    pub scope: TrackScope,
}

impl Default for TrackOptions {
    fn default() -> Self {
        Self {
            use_events: true,
            use_fallback_polling: true,
            scope: TrackScope::File,
        }
    }
}

pub struct GenerationClient {
    config: Arc<ProviderConfig>,
    http: Client,
    uploader: AssetUploader,
    submitter: SubmissionClient,
    poller: Arc<PollManager>,
    feed: Arc<CompletionFeed>,
    reconciler: Arc<Reconciler>,
}

impl GenerationClient {
    pub fn new(config: ProviderConfig) -> Self {
        Self::with_poll_config(config, PollConfig::default())
    }

    pub fn with_poll_config(config: ProviderConfig, poll: PollConfig) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()
            .expect("failed to build HTTP client");
        let config = Arc::new(config);
        Self {
            uploader: AssetUploader::new(http.clone(), Arc::clone(&config)),
            submitter: SubmissionClient::new(http.clone(), Arc::clone(&config)),
            poller: Arc::new(PollManager::new(poll)),
            feed: Arc::new(CompletionFeed::new(http.clone(), Arc::clone(&config))),
            reconciler: Arc::new(Reconciler::new()),
            http,
            config,
        }
    }

    /// Build from `RIPTIDE_API_BASE` / `RIPTIDE_API_KEY`.
    pub fn from_env() -> Option<Self> {
        ProviderConfig::from_env().map(Self::new)
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Run the request pipeline: validate, upload any source asset,
    /// build the mode-specific payload, submit. The artifact is tracked
    /// from the first step; acceptance rekeys it to the provider job id,
    /// rejection leaves it under the request id with an error state.
    ///
    /// Pipeline failures are reported in the result, not thrown.
    pub async fn generate(&self, request: &GenerationRequest) -> SubmissionResult {
        let request_id = Uuid::new_v4().to_string();
        let strategy = strategy_for(request.mode);

        self.reconciler.register(&request_id, request);
        self.reconciler
            .update_status(&request_id, ArtifactStatus::Preparing, None);

        if let Err(error) = strategy.validate(request) {
            self.reconciler
                .mark_error(&request_id, error.user_message(), "validate");
            return SubmissionResult::Rejected { request_id, error };
        }

        // Source upload happens inside payload building, so nothing is
        // submitted if it fails.
        let payload = match strategy.build_payload(request, &self.uploader).await {
            Ok(payload) => payload,
            Err(error) => {
                self.reconciler
                    .mark_error(&request_id, error.user_message(), "prepare");
                return SubmissionResult::Rejected { request_id, error };
            }
        };

        let result = self
            .submitter
            .submit(request.mode, &payload, &request_id)
            .await;
        match &result {
            SubmissionResult::Accepted {
                job_id, message, ..
            } => {
                self.reconciler.promote(&request_id, job_id, message.clone());
            }
            SubmissionResult::Rejected { error, .. } => {
                self.reconciler
                    .mark_error(&request_id, error.user_message(), "submit");
            }
        }
        result
    }

    /// Wait for a terminal outcome on an accepted job, racing push
    /// events against fallback polling per `options`. Exactly one
    /// terminal state is applied no matter which channel wins; the
    /// losing channel is cancelled. Returns the terminal artifact state.
    ///
    /// The wait is always bounded. With fallback polling the poller owns
    /// the deadline and its timeout outcome carries the attempt count;
    /// events-only sessions are cut off by the poll budget directly.
    pub async fn track_completion(
        &self,
        job_id: &str,
        options: TrackOptions,
    ) -> Result<ArtifactState, RiptideError> {
        if !options.use_events && !options.use_fallback_polling {
            return Err(RiptideError::Validation(
                "completion tracking needs at least one channel enabled".to_string(),
            ));
        }
        let mut observer = self
            .reconciler
            .watch(job_id)
            .ok_or_else(|| RiptideError::Validation(format!("job {job_id} is not tracked")))?;

        {
            let state = observer.borrow().clone();
            if state.status.is_terminal() {
                return Ok(state);
            }
        }

        if options.use_events {
            self.spawn_push_watcher(job_id, &options.scope);
        }
        if options.use_fallback_polling {
            self.spawn_fallback_poll(job_id, &options);
        }

        // The backstop must outlast a running poller (grace included) so
        // the poller's own timeout is the one recorded.
        let poll_budget = self.poller.config().max_duration;
        let budget = if options.use_fallback_polling {
            poll_budget + self.poll_grace(&options) + POLL_REPORT_MARGIN
        } else {
            poll_budget
        };
        let waited = tokio::time::timeout(budget, async {
            loop {
                {
                    let state = observer.borrow_and_update();
                    if state.status.is_terminal() {
                        break;
                    }
                }
                if observer.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        if waited.is_err() {
            // No channel reported within the budget; there are no
            // attempts to count.
            let timeout = RiptideError::Timeout {
                elapsed_secs: budget.as_secs(),
                attempts: 0,
            };
            self.reconciler
                .mark_error(job_id, timeout.user_message(), "track");
        }

        self.reconciler.artifact(job_id).ok_or_else(|| {
            RiptideError::ChannelClosed("artifact discarded while tracking".to_string())
        })
    }

    fn spawn_push_watcher(&self, job_id: &str, scope: &TrackScope) {
        let channel = match scope {
            TrackScope::Project { project_id } => project_id.clone(),
            TrackScope::File => DEFAULT_EVENTS_CHANNEL.to_string(),
        };
        let mut subscription = self.feed.subscribe(&channel);
        let cancel = CancellationToken::new();
        self.reconciler.add_teardown(job_id, cancel.clone());

        let reconciler = Arc::clone(&self.reconciler);
        let job = job_id.to_string();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    event = subscription.recv() => event,
                };
                match event {
                    Some(event) if event.job_id == job => {
                        reconciler.propose_completion(
                            &job,
                            &event.asset_url,
                            event.thumbnail_url.as_deref(),
                            "push",
                        );
                        return;
                    }
                    // A completion for some other job on this channel.
                    Some(_) => {}
                    None => return,
                }
            }
        });
    }

    /// Delay before the fallback poller's first check: the configured
    /// grace when push events are also listening, zero otherwise.
    fn poll_grace(&self, options: &TrackOptions) -> Duration {
        if options.use_events {
            self.poller.config().grace_delay
        } else {
            Duration::ZERO
        }
    }

    fn spawn_fallback_poll(&self, job_id: &str, options: &TrackOptions) {
        let cancel = CancellationToken::new();
        self.reconciler.add_teardown(job_id, cancel.clone());

        let grace = self.poll_grace(options);
        let expected_kind = self
            .reconciler
            .artifact(job_id)
            .map(|s| if s.content.mode.is_video() { "video" } else { "image" }.to_string());

        let poller = Arc::clone(&self.poller);
        let reconciler = Arc::clone(&self.reconciler);
        let client = self.http.clone();
        let config = Arc::clone(&self.config);
        let scope = options.scope.clone();
        let job = job_id.to_string();
        tokio::spawn(async move {
            if !grace.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(grace) => {}
                }
            }
            let outcome = match scope {
                TrackScope::File => {
                    let checker = FileStatusChecker::new(client, config, job.clone());
                    poller.start_polling_with_cancel(&job, checker, cancel).await
                }
                TrackScope::Project { project_id } => {
                    let checker =
                        ProjectStatusChecker::new(client, config, project_id, expected_kind);
                    poller.start_polling_with_cancel(&job, checker, cancel).await
                }
            };
            apply_poll_outcome(&reconciler, &job, outcome);
        });
    }

    /// Snapshot of a tracked artifact, keyed by job id (or request id
    /// while unaccepted).
    pub fn artifact(&self, key: &str) -> Option<ArtifactState> {
        self.reconciler.artifact(key)
    }

    /// Watch a tracked artifact for state changes.
    pub fn watch_artifact(&self, key: &str) -> Option<watch::Receiver<ArtifactState>> {
        self.reconciler.watch(key)
    }

    /// Drop a tracked artifact. Any completion channels still running
    /// for it are cancelled through their teardown tokens.
    pub fn discard_artifact(&self, key: &str) -> bool {
        self.reconciler.discard(key)
    }
}

fn apply_poll_outcome(reconciler: &Reconciler, job_id: &str, outcome: PollOutcome) {
    match outcome {
        PollOutcome::Completed { data, .. } => {
            reconciler.propose_completion(
                job_id,
                &data.asset_url,
                data.thumbnail_url.as_deref(),
                "poll",
            );
        }
        PollOutcome::TimedOut { attempts, elapsed } => {
            let error = RiptideError::Timeout {
                elapsed_secs: elapsed.as_secs(),
                attempts,
            };
            reconciler.mark_error(job_id, error.user_message(), "poll");
        }
        PollOutcome::Failed { error, .. } => {
            reconciler.mark_error(job_id, error.user_message(), "poll");
        }
        // The other channel already settled the job.
        PollOutcome::Aborted { .. } => {}
    }
}
