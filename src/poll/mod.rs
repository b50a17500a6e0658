pub mod checkers;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::PollConfig;
use crate::error::RiptideError;

/// Cap on a single in-flight status check, clamped further by the run's
/// remaining budget.
const CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Media payload carried by a successful completion check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionData {
    pub asset_url: String,
    pub thumbnail_url: Option<String>,
}

/// One status probe's verdict.
#[derive(Debug, Clone)]
pub struct StatusCheck {
    /// Terminal success; `data` carries the resolved asset.
    pub completed: bool,
    /// False means unrecoverable; the poller stops without retrying.
    pub should_continue: bool,
    pub data: Option<CompletionData>,
    /// Diagnostic accompanying the verdict. Non-fatal while
    /// `should_continue` is true; the failure reason otherwise.
    pub error: Option<String>,
}

impl StatusCheck {
    pub fn complete(data: CompletionData) -> Self {
        Self {
            completed: true,
            should_continue: false,
            data: Some(data),
            error: None,
        }
    }

    pub fn pending() -> Self {
        Self {
            completed: false,
            should_continue: true,
            data: None,
            error: None,
        }
    }

    /// Still polling, but something looked off (e.g. a possible stall).
    pub fn pending_with_note(note: impl Into<String>) -> Self {
        Self {
            completed: false,
            should_continue: true,
            data: None,
            error: Some(note.into()),
        }
    }

    /// Unrecoverable: the provider reported the job itself failed.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            completed: false,
            should_continue: false,
            data: None,
            error: Some(reason.into()),
        }
    }
}

/// Job status probe driven by the poller. Invoked once per attempt;
/// attempts for one job are strictly sequential.
///
/// An `Err` is a checker failure (network blip, rate limit) and feeds
/// the poller's backoff machinery; a returned [`StatusCheck`] is a
/// provider verdict.
pub trait StatusChecker: Send {
    fn check(&mut self) -> impl Future<Output = Result<StatusCheck, RiptideError>> + Send;
}

/// Terminal outcome of one poll run.
#[derive(Debug)]
pub enum PollOutcome {
    /// The checker observed a completed job.
    Completed {
        data: CompletionData,
        attempts: u32,
        elapsed: Duration,
    },
    /// Wall-clock budget exhausted, or checks stalled repeatedly, before
    /// any terminal verdict.
    TimedOut { attempts: u32, elapsed: Duration },
    /// Unrecoverable: the job failed, or the consecutive-error ceiling
    /// was reached.
    Failed {
        error: RiptideError,
        attempts: u32,
    },
    /// Cancelled by `stop_polling`, a restart for the same job, or a
    /// completion race won by the other channel.
    Aborted { attempts: u32 },
}

struct ActivePoll {
    run_id: u64,
    cancel: CancellationToken,
}

/// Job-keyed polling registry. One instance per client; at most one
/// active loop per job id.
pub struct PollManager {
    config: PollConfig,
    next_run: AtomicU64,
    jobs: Mutex<HashMap<String, ActivePoll>>,
}

impl PollManager {
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            next_run: AtomicU64::new(0),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Poll `job_id` until a terminal outcome. If a loop is already
    /// running for this id it is cancelled first, so at most one loop
    /// per job exists at any time.
    pub async fn start_polling<C: StatusChecker>(&self, job_id: &str, checker: C) -> PollOutcome {
        self.start_polling_with_cancel(job_id, checker, CancellationToken::new())
            .await
    }

    /// Like [`start_polling`](Self::start_polling), but the loop also
    /// aborts when `external` fires. Cleanup still runs inside the loop,
    /// so an external cancel never strands a registry entry.
    pub async fn start_polling_with_cancel<C: StatusChecker>(
        &self,
        job_id: &str,
        checker: C,
        external: CancellationToken,
    ) -> PollOutcome {
        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let cancel = external.child_token();
        let started_at = Instant::now();

        {
            let mut jobs = self.jobs.lock().expect("poll registry lock poisoned");
            if let Some(prev) = jobs.insert(
                job_id.to_string(),
                ActivePoll {
                    run_id,
                    cancel: cancel.clone(),
                },
            ) {
                tracing::warn!(job_id, "restarting poll for an actively polled job");
                prev.cancel.cancel();
            }
        }

        let outcome = self
            .run_loop(job_id, checker, &cancel, started_at)
            .await;

        // Remove our registry entry unless a restart already replaced it.
        {
            let mut jobs = self.jobs.lock().expect("poll registry lock poisoned");
            if jobs.get(job_id).is_some_and(|p| p.run_id == run_id) {
                jobs.remove(job_id);
            }
        }

        match &outcome {
            PollOutcome::Completed {
                attempts, elapsed, ..
            } => {
                tracing::info!(
                    job_id,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "poll completed"
                );
            }
            PollOutcome::TimedOut { attempts, elapsed } => {
                tracing::warn!(
                    job_id,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "poll timed out"
                );
            }
            PollOutcome::Failed { error, attempts } => {
                tracing::warn!(job_id, attempts, "poll failed: {error}");
            }
            PollOutcome::Aborted { attempts } => {
                tracing::debug!(job_id, attempts, "poll aborted");
            }
        }

        outcome
    }

    async fn run_loop<C: StatusChecker>(
        &self,
        job_id: &str,
        mut checker: C,
        cancel: &CancellationToken,
        started_at: Instant,
    ) -> PollOutcome {
        let config = &self.config;
        let mut attempts: u32 = 0;
        let mut consecutive_errors: u32 = 0;
        let mut interval = config.initial_interval.min(config.max_interval);

        loop {
            let elapsed = started_at.elapsed();
            if elapsed >= config.max_duration {
                return PollOutcome::TimedOut { attempts, elapsed };
            }

            attempts += 1;
            // Each check is bounded by the remaining budget, so a stalled
            // request can never hold the loop past `max_duration`.
            let check_budget = config.max_duration.saturating_sub(elapsed).min(CHECK_TIMEOUT);
            let verdict = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Aborted { attempts },
                verdict = tokio::time::timeout(check_budget, checker.check()) => verdict,
            };

            match verdict {
                Ok(Ok(check)) if check.completed => {
                    return PollOutcome::Completed {
                        data: check.data.unwrap_or_default(),
                        attempts,
                        elapsed: started_at.elapsed(),
                    };
                }
                Ok(Ok(check)) if !check.should_continue => {
                    let reason = check
                        .error
                        .unwrap_or_else(|| "provider reported generation failure".to_string());
                    return PollOutcome::Failed {
                        error: RiptideError::JobFailed(reason),
                        attempts,
                    };
                }
                Ok(Ok(check)) => {
                    consecutive_errors = 0;
                    if let Some(note) = check.error {
                        tracing::warn!(job_id, attempt = attempts, "status check continuing: {note}");
                    }
                    interval = staged_interval(attempts, config);
                }
                Ok(Err(RiptideError::RateLimited { retry_after })) => {
                    // 429s do not count toward the give-up ceiling; they
                    // only widen the interval.
                    let widened = retry_after
                        .unwrap_or_else(|| interval.saturating_mul(2))
                        .min(config.max_interval);
                    interval = widened.max(interval);
                    tracing::warn!(
                        job_id,
                        attempt = attempts,
                        interval_ms = interval.as_millis() as u64,
                        "rate limited, widening poll interval"
                    );
                }
                Ok(Err(e)) => {
                    consecutive_errors += 1;
                    tracing::warn!(
                        job_id,
                        attempt = attempts,
                        consecutive = consecutive_errors,
                        "status check failed: {e}"
                    );
                    if consecutive_errors >= config.max_consecutive_errors {
                        return PollOutcome::Failed {
                            error: RiptideError::PollFailed {
                                job_id: job_id.to_string(),
                                message: format!("{consecutive_errors} consecutive errors: {e}"),
                            },
                            attempts,
                        };
                    }
                    interval = interval
                        .mul_f64(config.backoff_multiplier)
                        .min(config.max_interval);
                }
                Err(_) => {
                    // Stalls count toward the ceiling like other errors but
                    // escalate to a timeout, not a poll failure.
                    consecutive_errors += 1;
                    tracing::warn!(
                        job_id,
                        attempt = attempts,
                        consecutive = consecutive_errors,
                        budget_ms = check_budget.as_millis() as u64,
                        "status check stalled past its budget"
                    );
                    if consecutive_errors >= config.max_consecutive_errors {
                        return PollOutcome::TimedOut {
                            attempts,
                            elapsed: started_at.elapsed(),
                        };
                    }
                    interval = interval
                        .mul_f64(config.backoff_multiplier)
                        .min(config.max_interval);
                }
            }

            // Never sleep past the budget; the next iteration converts an
            // exhausted budget into the timeout outcome.
            let remaining = config.max_duration.saturating_sub(started_at.elapsed());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Aborted { attempts },
                _ = tokio::time::sleep(interval.min(remaining)) => {}
            }
        }
    }

    /// Cancel the active poll for `job_id`. Returns whether one existed.
    pub fn stop_polling(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.lock().expect("poll registry lock poisoned");
        match jobs.remove(job_id) {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        self.jobs
            .lock()
            .expect("poll registry lock poisoned")
            .contains_key(job_id)
    }
}

/// Fixed interval schedule absent errors: the configured initial
/// interval, then 2s, then 5s, then the configured max. Steps are
/// clamped so raising the initial interval never steps the schedule
/// back down.
pub fn staged_interval(attempt: u32, config: &PollConfig) -> Duration {
    let step = match attempt {
        0 | 1 => config.initial_interval,
        2 => Duration::from_secs(2),
        3 => Duration::from_secs(5),
        _ => config.max_interval,
    };
    let floor = config.initial_interval.min(config.max_interval);
    step.clamp(floor, config.max_interval)
}
