//! Tests for the adaptive poller: staged intervals, error backoff and
//! ceiling, rate-limit handling, the hard timeout, and single-loop-per-
//! job enforcement.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use riptide::config::{PollConfig, ProviderConfig};
use riptide::error::RiptideError;
use riptide::poll::checkers::FileStatusChecker;
use riptide::poll::{CompletionData, PollManager, PollOutcome, StatusCheck, StatusChecker};

// ---------------------------------------------------------------------------
// Scripted checker
// ---------------------------------------------------------------------------

enum Step {
    Pending,
    Complete(&'static str),
    Fail(&'static str),
    Error,
    RateLimited(Option<Duration>),
}

/// Replays a fixed script of verdicts; repeats `Pending` once drained.
/// Records the instant of every call for interval assertions.
struct ScriptedChecker {
    steps: VecDeque<Step>,
    calls: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedChecker {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> Arc<Mutex<Vec<Instant>>> {
        Arc::clone(&self.calls)
    }
}

impl StatusChecker for ScriptedChecker {
    async fn check(&mut self) -> Result<StatusCheck, RiptideError> {
        self.calls.lock().unwrap().push(Instant::now());
        match self.steps.pop_front() {
            None | Some(Step::Pending) => Ok(StatusCheck::pending()),
            Some(Step::Complete(url)) => Ok(StatusCheck::complete(CompletionData {
                asset_url: url.to_string(),
                thumbnail_url: None,
            })),
            Some(Step::Fail(reason)) => Ok(StatusCheck::fail(reason)),
            Some(Step::Error) => Err(RiptideError::PollFailed {
                job_id: "job-x".to_string(),
                message: "connection reset".to_string(),
            }),
            Some(Step::RateLimited(retry_after)) => Err(RiptideError::RateLimited { retry_after }),
        }
    }
}

fn fast_config(max_duration: Duration) -> PollConfig {
    PollConfig {
        max_duration,
        initial_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(40),
        backoff_multiplier: 2.0,
        max_consecutive_errors: 5,
        grace_delay: Duration::from_millis(10),
    }
}

// ---------------------------------------------------------------------------
// Terminal outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completes_on_first_check() {
    let poller = PollManager::new(fast_config(Duration::from_secs(5)));
    let checker = ScriptedChecker::new(vec![Step::Complete("https://cdn.example/out.png")]);

    match poller.start_polling("job-1", checker).await {
        PollOutcome::Completed { data, attempts, .. } => {
            assert_eq!(data.asset_url, "https://cdn.example/out.png");
            assert_eq!(attempts, 1);
        }
        other => panic!("expected Completed, got {other:?}"),
    }
    assert!(!poller.is_polling("job-1"));
}

#[tokio::test]
async fn transient_errors_then_success_reports_total_attempts() {
    let poller = PollManager::new(fast_config(Duration::from_secs(5)));
    let checker = ScriptedChecker::new(vec![
        Step::Error,
        Step::Error,
        Step::Complete("https://cdn.example/out.png"),
    ]);

    match poller.start_polling("job-1", checker).await {
        PollOutcome::Completed { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected Completed, got {other:?}"),
    }
}

#[tokio::test]
async fn provider_failure_stops_without_retrying() {
    let poller = PollManager::new(fast_config(Duration::from_secs(5)));
    let checker = ScriptedChecker::new(vec![Step::Pending, Step::Fail("content rejected")]);

    match poller.start_polling("job-1", checker).await {
        PollOutcome::Failed { error, attempts } => {
            assert_eq!(attempts, 2);
            match error {
                RiptideError::JobFailed(reason) => assert!(reason.contains("content rejected")),
                other => panic!("expected JobFailed, got {other:?}"),
            }
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn consecutive_error_ceiling_gives_up() {
    let poller = PollManager::new(fast_config(Duration::from_secs(5)));
    let checker = ScriptedChecker::new(vec![
        Step::Error,
        Step::Error,
        Step::Error,
        Step::Error,
        Step::Error,
    ]);

    match poller.start_polling("job-1", checker).await {
        PollOutcome::Failed { error, attempts } => {
            assert_eq!(attempts, 5);
            assert!(matches!(error, RiptideError::PollFailed { .. }), "got {error:?}");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn successful_checks_reset_the_error_ceiling() {
    let mut config = fast_config(Duration::from_secs(5));
    config.max_consecutive_errors = 3;
    let poller = PollManager::new(config);
    let checker = ScriptedChecker::new(vec![
        Step::Error,
        Step::Error,
        Step::Pending,
        Step::Error,
        Step::Error,
        Step::Pending,
        Step::Complete("https://cdn.example/out.png"),
    ]);

    match poller.start_polling("job-1", checker).await {
        PollOutcome::Completed { attempts, .. } => assert_eq!(attempts, 7),
        other => panic!("expected Completed, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Hard timeout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timeout_is_bounded_by_max_duration() {
    let poller = PollManager::new(fast_config(Duration::from_millis(150)));
    let checker = ScriptedChecker::new(Vec::new()); // pending forever

    let start = Instant::now();
    match poller.start_polling("job-1", checker).await {
        PollOutcome::TimedOut { attempts, elapsed } => {
            assert!(attempts >= 1);
            assert!(elapsed >= Duration::from_millis(150));
        }
        other => panic!("expected TimedOut, got {other:?}"),
    }
    // Bounded: the final sleep is capped to the remaining budget.
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!poller.is_polling("job-1"));
}

/// Models a provider that accepts the request and never responds.
struct StalledChecker;

impl StatusChecker for StalledChecker {
    async fn check(&mut self) -> Result<StatusCheck, RiptideError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn a_stalled_check_cannot_hold_the_loop_past_the_budget() {
    let poller = PollManager::new(fast_config(Duration::from_millis(200)));

    let start = Instant::now();
    match poller.start_polling("job-1", StalledChecker).await {
        PollOutcome::TimedOut { attempts, elapsed } => {
            assert_eq!(attempts, 1);
            assert!(elapsed >= Duration::from_millis(200));
        }
        other => panic!("expected TimedOut, got {other:?}"),
    }
    assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
    assert!(!poller.is_polling("job-1"));
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limits_widen_the_interval_and_never_trip_the_ceiling() {
    let max_interval = Duration::from_millis(80);
    let mut config = fast_config(Duration::from_millis(600));
    config.initial_interval = Duration::from_millis(20);
    config.max_interval = max_interval;
    config.max_consecutive_errors = 2;
    let poller = PollManager::new(config);

    let mut steps = Vec::new();
    for _ in 0..64 {
        steps.push(Step::RateLimited(None));
    }
    let checker = ScriptedChecker::new(steps);
    let calls = checker.calls();

    // A timeout, not a failure: 429s never count toward the ceiling.
    match poller.start_polling("job-1", checker).await {
        PollOutcome::TimedOut { .. } => {}
        other => panic!("expected TimedOut, got {other:?}"),
    }

    let calls = calls.lock().unwrap();
    assert!(calls.len() >= 4, "expected several attempts, got {}", calls.len());
    let gaps: Vec<Duration> = calls
        .windows(2)
        .map(|pair| pair[1].duration_since(pair[0]))
        .collect();

    // The first 429 already doubled the 20ms interval.
    assert!(gaps[0] >= Duration::from_millis(40), "first gap was {:?}", gaps[0]);
    // Monotonic: waits never narrow under constant 429s. The allowance
    // covers timer jitter between equal intervals.
    for pair in gaps.windows(2) {
        assert!(
            pair[1] + Duration::from_millis(25) >= pair[0],
            "interval narrowed under constant 429s: {gaps:?}"
        );
    }
    // Capped at max_interval; uncapped doubling would reach 160ms.
    for gap in &gaps {
        assert!(
            *gap < max_interval + Duration::from_millis(60),
            "interval overran the cap: {gaps:?}"
        );
    }
}

#[tokio::test]
async fn retry_after_hint_sets_the_next_interval() {
    let mut config = fast_config(Duration::from_secs(5));
    config.max_interval = Duration::from_millis(500);
    let poller = PollManager::new(config);

    let checker = ScriptedChecker::new(vec![
        Step::RateLimited(Some(Duration::from_millis(200))),
        Step::Complete("https://cdn.example/out.png"),
    ]);
    let calls = checker.calls();

    match poller.start_polling("job-1", checker).await {
        PollOutcome::Completed { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("expected Completed, got {other:?}"),
    }

    let calls = calls.lock().unwrap();
    let gap = calls[1].duration_since(calls[0]);
    assert!(gap >= Duration::from_millis(180), "gap was {gap:?}");
}

// ---------------------------------------------------------------------------
// One loop per job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restarting_a_job_cancels_the_prior_loop() {
    let poller = Arc::new(PollManager::new(fast_config(Duration::from_secs(5))));

    let first = {
        let poller = Arc::clone(&poller);
        tokio::spawn(async move {
            poller
                .start_polling("job-1", ScriptedChecker::new(Vec::new()))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(poller.is_polling("job-1"));

    let second = poller
        .start_polling(
            "job-1",
            ScriptedChecker::new(vec![Step::Complete("https://cdn.example/out.png")]),
        )
        .await;
    assert!(matches!(second, PollOutcome::Completed { .. }));

    match first.await.unwrap() {
        PollOutcome::Aborted { .. } => {}
        other => panic!("expected the first loop to abort, got {other:?}"),
    }
    assert!(!poller.is_polling("job-1"));
}

#[tokio::test]
async fn stop_polling_aborts_the_active_loop() {
    let poller = Arc::new(PollManager::new(fast_config(Duration::from_secs(5))));

    let handle = {
        let poller = Arc::clone(&poller);
        tokio::spawn(async move {
            poller
                .start_polling("job-1", ScriptedChecker::new(Vec::new()))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(40)).await;

    assert!(poller.stop_polling("job-1"));
    assert!(matches!(handle.await.unwrap(), PollOutcome::Aborted { .. }));
    assert!(!poller.is_polling("job-1"));
    assert!(!poller.stop_polling("job-1"));
}

#[tokio::test]
async fn external_token_aborts_through_the_child_token() {
    let poller = Arc::new(PollManager::new(fast_config(Duration::from_secs(5))));
    let external = CancellationToken::new();

    let handle = {
        let poller = Arc::clone(&poller);
        let external = external.clone();
        tokio::spawn(async move {
            poller
                .start_polling_with_cancel("job-1", ScriptedChecker::new(Vec::new()), external)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(40)).await;

    external.cancel();
    assert!(matches!(handle.await.unwrap(), PollOutcome::Aborted { .. }));
    assert!(!poller.is_polling("job-1"));
}

// ---------------------------------------------------------------------------
// File status checker over HTTP
// ---------------------------------------------------------------------------

async fn mock_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn http_response(status: &str, extra_headers: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{extra_headers}Connection: close\r\n\r\n{body}",
        body.len()
    )
}

fn respond_in_sequence(listener: TcpListener, responses: Vec<String>) -> tokio::task::JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut seen = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            seen.push(String::from_utf8_lossy(&buf[..n]).to_string());
            socket.write_all(response.as_bytes()).await.unwrap();
        }
        seen
    })
}

fn provider(port: u16) -> Arc<ProviderConfig> {
    Arc::new(ProviderConfig::new(
        format!("http://127.0.0.1:{port}"),
        "test-key",
    ))
}

#[tokio::test]
async fn file_checker_polls_through_404_and_pending_to_completion() {
    let (listener, port) = mock_listener().await;
    let server = respond_in_sequence(
        listener,
        vec![
            // Record not visible yet: keep polling, no error counted.
            http_response("404 Not Found", "", r#"{"error":"not found"}"#),
            http_response("200 OK", "", r#"{"tasks":[{"status":"RUNNING"}]}"#),
            http_response(
                "200 OK",
                "",
                r#"{"url":"https://cdn.example/final.mp4","thumbnailUrl":"https://cdn.example/t.jpg"}"#,
            ),
        ],
    );

    let poller = PollManager::new(fast_config(Duration::from_secs(5)));
    let checker = FileStatusChecker::new(reqwest::Client::new(), provider(port), "job-7");

    match poller.start_polling("job-7", checker).await {
        PollOutcome::Completed { data, attempts, .. } => {
            assert_eq!(attempts, 3);
            assert_eq!(data.asset_url, "https://cdn.example/final.mp4");
            assert_eq!(data.thumbnail_url.as_deref(), Some("https://cdn.example/t.jpg"));
        }
        other => panic!("expected Completed, got {other:?}"),
    }

    let seen = server.await.unwrap();
    assert!(seen[0].starts_with("GET /v1/files/job-7"), "got: {}", seen[0]);
    assert!(seen[0].contains("Bearer test-key"));
}

#[tokio::test]
async fn file_checker_parses_retry_after_hint() {
    let (listener, port) = mock_listener().await;
    let server = respond_in_sequence(
        listener,
        vec![http_response(
            "429 Too Many Requests",
            "Retry-After: 2\r\n",
            r#"{"error":"slow down"}"#,
        )],
    );

    let mut checker = FileStatusChecker::new(reqwest::Client::new(), provider(port), "job-7");
    match checker.check().await {
        Err(RiptideError::RateLimited { retry_after }) => {
            assert_eq!(retry_after, Some(Duration::from_secs(2)));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }

    server.await.unwrap();
}

#[tokio::test]
async fn file_checker_error_marker_fails_the_job() {
    let (listener, port) = mock_listener().await;
    let server = respond_in_sequence(
        listener,
        vec![http_response(
            "200 OK",
            "",
            r#"{"tasks":[{"status":"SUCCESS"},{"status":"ERROR"}]}"#,
        )],
    );

    let poller = PollManager::new(fast_config(Duration::from_secs(5)));
    let checker = FileStatusChecker::new(reqwest::Client::new(), provider(port), "job-8");

    match poller.start_polling("job-8", checker).await {
        PollOutcome::Failed { error, attempts } => {
            assert_eq!(attempts, 1);
            assert!(matches!(error, RiptideError::JobFailed(_)), "got {error:?}");
        }
        other => panic!("expected Failed, got {other:?}"),
    }

    server.await.unwrap();
}
