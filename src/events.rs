//! Push-channel completion detection over server-sent events.
//!
//! [`CompletionFeed`] keeps at most one SSE connection per channel and
//! fans frames out to subscribers through a `tokio::sync::broadcast`
//! channel. The connection is opened when the first subscriber arrives
//! and torn down when the last one goes away. A dropped connection is
//! re-established with exponential backoff; subscribers are unaware of
//! reconnects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::ProviderConfig;

/// Buffered completion events per channel. Completions are rare, so a
/// small buffer suffices; laggards skip to the newest events.
const EVENT_BUFFER: usize = 16;

/// Frame kinds that announce finished media.
const COMPLETED_MEDIA_KINDS: &[&str] = &["image", "video"];

/// A finished-media announcement received over the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    pub job_id: String,
    pub kind: String,
    pub asset_url: String,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventFrame {
    #[serde(default, alias = "fileId", alias = "file_id", alias = "job_id")]
    job_id: Option<String>,
    #[serde(default, alias = "type")]
    kind: Option<String>,
    #[serde(default, alias = "assetUrl", alias = "asset_url")]
    url: Option<String>,
    #[serde(default, alias = "thumbnail_url")]
    thumbnail_url: Option<String>,
}

/// Parse one SSE data payload into a completion. Frames whose kind is
/// not a finished-media marker, or that lack a job id or a ready asset
/// URL, are not completions and yield `None`.
pub fn parse_completion(data: &str) -> Option<CompletionEvent> {
    let frame: EventFrame = serde_json::from_str(data).ok()?;
    let kind = frame.kind?;
    if !COMPLETED_MEDIA_KINDS.contains(&kind.as_str()) {
        return None;
    }
    let job_id = frame.job_id.filter(|id| !id.is_empty())?;
    let asset_url = frame.url.filter(|u| !u.is_empty())?;
    Some(CompletionEvent {
        job_id,
        kind,
        asset_url,
        thumbnail_url: frame.thumbnail_url.filter(|t| !t.is_empty()),
    })
}

/// Backoff between reconnection attempts after the stream drops.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Next delay after `current`, capped at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_delay)
    }
}

struct ChannelState {
    sender: broadcast::Sender<CompletionEvent>,
    cancel: CancellationToken,
    subscribers: usize,
}

/// Shared SSE listener registry, one connection per channel key.
pub struct CompletionFeed {
    client: Client,
    config: Arc<ProviderConfig>,
    reconnect: ReconnectConfig,
    channels: Mutex<HashMap<String, ChannelState>>,
}

impl CompletionFeed {
    pub fn new(client: Client, config: Arc<ProviderConfig>) -> Self {
        Self {
            client,
            config,
            reconnect: ReconnectConfig::default(),
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Subscribe to completions on `channel`, opening the SSE connection
    /// if this is the first subscriber. Must be called inside a Tokio
    /// runtime.
    pub fn subscribe(self: &Arc<Self>, channel: &str) -> CompletionSubscription {
        let mut channels = self.channels.lock().expect("completion feed lock poisoned");
        let receiver = match channels.get_mut(channel) {
            Some(state) => {
                state.subscribers += 1;
                state.sender.subscribe()
            }
            None => {
                let (sender, receiver) = broadcast::channel(EVENT_BUFFER);
                let cancel = CancellationToken::new();
                tracing::debug!(channel, "opening event stream");
                tokio::spawn(run_listener(
                    self.client.clone(),
                    Arc::clone(&self.config),
                    self.reconnect.clone(),
                    channel.to_string(),
                    sender.clone(),
                    cancel.clone(),
                ));
                channels.insert(
                    channel.to_string(),
                    ChannelState {
                        sender,
                        cancel,
                        subscribers: 1,
                    },
                );
                receiver
            }
        };
        CompletionSubscription {
            feed: Arc::clone(self),
            channel: channel.to_string(),
            receiver,
        }
    }

    pub fn is_listening(&self, channel: &str) -> bool {
        self.channels
            .lock()
            .expect("completion feed lock poisoned")
            .contains_key(channel)
    }

    fn release(&self, channel: &str) {
        let mut channels = self.channels.lock().expect("completion feed lock poisoned");
        let Some(state) = channels.get_mut(channel) else {
            return;
        };
        state.subscribers = state.subscribers.saturating_sub(1);
        if state.subscribers == 0 {
            if let Some(state) = channels.remove(channel) {
                state.cancel.cancel();
            }
            tracing::debug!(channel, "last subscriber gone, closing event stream");
        }
    }
}

/// Handle on a channel subscription. Dropping it releases the slot; the
/// underlying connection closes once no subscribers remain.
pub struct CompletionSubscription {
    feed: Arc<CompletionFeed>,
    channel: String,
    receiver: broadcast::Receiver<CompletionEvent>,
}

impl CompletionSubscription {
    /// Next completion on this channel. Returns `None` once the feed has
    /// shut down. Lagging skips to the newest buffered events.
    pub async fn recv(&mut self) -> Option<CompletionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        channel = %self.channel,
                        skipped,
                        "subscriber lagged behind completion feed"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for CompletionSubscription {
    fn drop(&mut self) {
        self.feed.release(&self.channel);
    }
}

enum StreamEnd {
    Cancelled,
    Dropped { reason: String, connected: bool },
}

async fn run_listener(
    client: Client,
    config: Arc<ProviderConfig>,
    reconnect: ReconnectConfig,
    channel: String,
    sender: broadcast::Sender<CompletionEvent>,
    cancel: CancellationToken,
) {
    let mut delay = reconnect.initial_delay;
    loop {
        match stream_events(&client, &config, &channel, &sender, &cancel).await {
            StreamEnd::Cancelled => {
                tracing::debug!(channel, "event stream closed");
                return;
            }
            StreamEnd::Dropped { reason, connected } => {
                if connected {
                    delay = reconnect.initial_delay;
                }
                tracing::warn!(
                    channel,
                    delay_ms = delay.as_millis() as u64,
                    "event stream dropped ({reason}), reconnecting"
                );
            }
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = reconnect.next_delay(delay);
    }
}

/// One connection lifetime: connect, forward qualifying frames, report
/// how the stream ended.
async fn stream_events(
    client: &Client,
    config: &ProviderConfig,
    channel: &str,
    sender: &broadcast::Sender<CompletionEvent>,
    cancel: &CancellationToken,
) -> StreamEnd {
    let request = client
        .get(config.events_url(channel))
        .header("Authorization", format!("Bearer {}", config.api_key))
        .header("Accept", "text/event-stream")
        .send();

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return StreamEnd::Cancelled,
        response = request => response,
    };

    let response = match response {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            return StreamEnd::Dropped {
                reason: format!("HTTP {}", r.status()),
                connected: false,
            };
        }
        Err(e) => {
            return StreamEnd::Dropped {
                reason: e.to_string(),
                connected: false,
            };
        }
    };

    let mut stream = response.bytes_stream().eventsource();
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            event = stream.next() => event,
        };
        match event {
            None => {
                return StreamEnd::Dropped {
                    reason: "stream ended".to_string(),
                    connected: true,
                };
            }
            Some(Err(e)) => {
                return StreamEnd::Dropped {
                    reason: e.to_string(),
                    connected: true,
                };
            }
            Some(Ok(frame)) => {
                if frame.data.is_empty() {
                    continue;
                }
                match parse_completion(&frame.data) {
                    Some(event) => {
                        tracing::info!(channel, job_id = %event.job_id, "completion event received");
                        // Zero receivers just means nobody is waiting yet.
                        let _ = sender.send(event);
                    }
                    None => {
                        tracing::trace!(channel, "ignoring non-completion frame");
                    }
                }
            }
        }
    }
}
