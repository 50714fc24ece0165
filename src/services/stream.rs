// src/services/stream.rs

//! Live feed consumer.
//!
//! Owns the connection to the recent-changes stream and forwards relevant
//! edits on a bounded channel. Failures of any kind end the current
//! connection attempt and are retried after a backoff wait; the task only
//! stops once nobody is receiving anymore.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::models::{EditEvent, StreamConfig};

/// Longest feed line accepted before the attempt is abandoned.
const MAX_LINE_BYTES: usize = 1 << 20;

/// Caller-supplied relevance check run after the pre-filter.
pub type RelevanceFilter = Arc<dyn Fn(&EditEvent) -> bool + Send + Sync>;

/// Reconnect wait policy.
///
/// While failures keep coming within `reset_after` of each other the wait
/// is squared (`wait = clamp(wait², base, cap)`); after a quiet period it
/// drops back to `base`. The quiet period is measured from the end of the
/// previous wait, so the wait itself never counts as recovery.
/// Timing the quiet period from the failure itself, the plain reading of
/// the reset rule, would let a wait longer than `reset_after` reset on its own.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    reset_after: Duration,
    wait: Duration,
    last_failure: Option<Instant>,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, reset_after: Duration) -> Self {
        Self {
            base,
            cap,
            reset_after,
            wait: base,
            last_failure: None,
            consecutive_failures: 0,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(
            config.backoff_base(),
            config.backoff_cap(),
            config.backoff_reset(),
        )
    }

    /// Record a failure at `now` and return how long to wait.
    pub fn on_failure(&mut self, now: Instant) -> Duration {
        let recent = self
            .last_failure
            .is_some_and(|last| now.saturating_duration_since(last) < self.reset_after);

        if recent {
            let secs = self.wait.as_secs();
            self.wait = Duration::from_secs(secs.saturating_mul(secs)).clamp(self.base, self.cap);
            self.consecutive_failures += 1;
        } else {
            self.wait = self.base;
            self.consecutive_failures = 1;
        }

        self.last_failure = Some(now + self.wait);
        self.wait
    }

    /// Failures since the wait was last reset.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Connection lifecycle of the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// How a connection attempt ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptEnd {
    /// The server closed the body
    Closed,
    /// The processing side dropped its receiver
    ReceiverGone,
}

/// Long-running consumer of the recent-changes feed.
pub struct StreamConsumer {
    client: Client,
    url: String,
    watched_wiki: String,
    backoff: Backoff,
    state: ConnectionState,
}

impl StreamConsumer {
    pub fn new(client: Client, config: &StreamConfig, watched_wiki: impl Into<String>) -> Self {
        Self {
            client,
            url: config.url.clone(),
            watched_wiki: watched_wiki.into(),
            backoff: Backoff::from_config(config),
            state: ConnectionState::Disconnected,
        }
    }

    /// Start the consumer on its own task.
    ///
    /// Returns the receiving end of the bounded output channel. When the
    /// channel is full the consumer waits, which stalls the feed instead of
    /// dropping edits.
    pub fn spawn(
        self,
        capacity: usize,
        filter: RelevanceFilter,
    ) -> (mpsc::Receiver<EditEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(self.run(filter, tx));
        (rx, handle)
    }

    async fn run(mut self, filter: RelevanceFilter, tx: mpsc::Sender<EditEvent>) {
        loop {
            self.set_state(ConnectionState::Connecting);

            match self.consume(&filter, &tx).await {
                Ok(AttemptEnd::ReceiverGone) => {
                    log::info!("[Stream] Receiver dropped, stopping consumer");
                    return;
                }
                Ok(AttemptEnd::Closed) => log::warn!("[Stream] Feed closed the connection"),
                Err(e) => log::warn!("[Stream] {}", e),
            }

            self.set_state(ConnectionState::Disconnected);

            let wait = self.backoff.on_failure(Instant::now());
            log::info!(
                "[Stream] Waiting {:?} before reconnect (failure #{})",
                wait,
                self.backoff.consecutive_failures()
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = tx.closed() => {
                    log::info!("[Stream] Receiver dropped, stopping consumer");
                    return;
                }
            }
        }
    }

    /// Run one connection attempt until the body ends or fails.
    async fn consume(
        &mut self,
        filter: &RelevanceFilter,
        tx: &mpsc::Sender<EditEvent>,
    ) -> Result<AttemptEnd> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(AppError::stream(format!("unexpected status code {status}")));
        }

        self.set_state(ConnectionState::Connected);

        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for line in lines.push(&chunk)? {
                let Some(event) = decode_line(&line)? else {
                    continue;
                };
                if !event.passes_prefilter(&self.watched_wiki) || !filter(&event) {
                    continue;
                }

                log::debug!(
                    "[Stream] Relevant edit of {:?} by {:?}: {:?}",
                    event.title,
                    event.user,
                    event.comment
                );
                if tx.send(event).await.is_err() {
                    return Ok(AttemptEnd::ReceiverGone);
                }
            }
        }

        Ok(AttemptEnd::Closed)
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            log::info!("[Stream] {} -> {} ({})", self.state, state, self.url);
            self.state = state;
        }
    }
}

/// Splits a byte stream into newline-terminated lines.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            lines.push(line);
        }

        if self.pending.len() > MAX_LINE_BYTES {
            return Err(AppError::stream(format!(
                "feed line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }
        Ok(lines)
    }
}

/// Decode one feed line.
///
/// Plain JSON lines and server-sent-event framing are both accepted:
/// blank lines, comments and non-data fields yield `None`.
fn decode_line(line: &[u8]) -> Result<Option<EditEvent>> {
    let text = std::str::from_utf8(line)
        .map_err(|e| AppError::stream(format!("feed line is not UTF-8: {e}")))?
        .trim();

    if text.is_empty() || text.starts_with(':') {
        return Ok(None);
    }

    let payload = match text.strip_prefix("data:") {
        Some(data) => data.trim_start(),
        None if ["event:", "id:", "retry:"].iter().any(|f| text.starts_with(f)) => {
            return Ok(None);
        }
        None => text,
    };

    Ok(Some(serde_json::from_str(payload)?))
}
