//! Per-connection streaming session.
//!
//! One session owns one client's push channel for the lifetime of the
//! request: it writes the connection ack, optionally replays history, keeps
//! a heartbeat ticking, pumps live batches from the event source, and owns
//! the single idempotent cleanup path shared by the terminal-event,
//! disconnect, and cancellation routes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::writer::StreamWriter;
use crate::error::{RelayError, Result};
use crate::source::EventSource;
use crate::types::{EventEnvelope, StreamEvent, event_type, now_millis};

/// Interval between liveness ticks.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Most-recent window fetched for history replay.
pub const HISTORY_FETCH_LIMIT: usize = 100;

/// Capacity of the funnel between the source subscription and the driver.
const BATCH_CHANNEL_CAPACITY: usize = 32;

/// Validated options for one streaming connection.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub operation_id: String,
    pub last_event_id: String,
    pub include_history: bool,
}

impl SessionOptions {
    /// Validate raw request parameters. A missing operation id is a client
    /// error surfaced before any stream is opened.
    pub fn from_request(
        operation_id: Option<String>,
        last_event_id: Option<String>,
        include_history: bool,
    ) -> Result<Self> {
        let operation_id = operation_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(RelayError::MissingParameter("operationId"))?;
        Ok(Self {
            operation_id,
            last_event_id: last_event_id.unwrap_or_else(|| "0".to_string()),
            include_history,
        })
    }
}

/// One client's streaming connection.
///
/// Three concurrent activities write through this shared handle: the one-shot
/// history replay, the heartbeat timer, and the live pump. Whichever marks
/// the connection ended first wins; every writer checks the flag before
/// touching the channel, and cleanup runs at most once.
pub struct StreamSession {
    options: SessionOptions,
    writer: Box<dyn StreamWriter>,
    ended: AtomicBool,
    cleaned_up: AtomicBool,
    cancel: CancellationToken,
}

impl StreamSession {
    pub fn new(options: SessionOptions, writer: Box<dyn StreamWriter>) -> Arc<Self> {
        Arc::new(Self {
            options,
            writer,
            ended: AtomicBool::new(false),
            cleaned_up: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    pub fn operation_id(&self) -> &str {
        &self.options.operation_id
    }

    /// Token that ends this session when cancelled; transports hand it to
    /// their disconnect signal.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Idempotent cleanup shared by the terminal-event, disconnect, and
    /// cancellation paths: marks the connection ended, stops the heartbeat,
    /// and cancels the live subscription.
    pub fn finish(&self) {
        self.ended.store(true, Ordering::SeqCst);
        if self.cleaned_up.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        debug!(operation_id = %self.options.operation_id, "stream session closed");
    }

    /// Drive the connection to completion: ack, optional replay, heartbeat,
    /// live delivery. Returns once the connection has ended by any path.
    pub async fn run(self: Arc<Self>, source: Arc<dyn EventSource>) {
        debug!(
            operation_id = %self.options.operation_id,
            last_event_id = %self.options.last_event_id,
            include_history = self.options.include_history,
            "stream session opened"
        );

        let ack = EventEnvelope::control(event_type::CONNECTED, &self.options.operation_id)
            .with_field("lastEventId", self.options.last_event_id.clone());
        if let Err(err) = self.write(ack).await {
            warn!(operation_id = %self.options.operation_id, error = %err, "connection ack write failed");
            self.finish();
            return;
        }

        // Liveness keeps ticking while history is written out.
        let heartbeat = tokio::spawn(self.clone().heartbeat_loop());

        if self.options.include_history {
            self.replay_history(source.as_ref()).await;
        }

        self.pump_live(source).await;
        self.finish();
        let _ = heartbeat.await;
    }

    async fn write(&self, envelope: EventEnvelope) -> Result<()> {
        if self.ended.load(Ordering::SeqCst) {
            return Err(RelayError::ChannelClosed);
        }
        self.writer.write(envelope).await
    }

    /// Report an in-band error event; the connection stays open.
    async fn report_error(&self, err: &RelayError, context: &str) {
        let report = EventEnvelope::control(event_type::ERROR, &self.options.operation_id)
            .with_field("error", err.to_string())
            .with_field("context", context);
        if let Err(write_err) = self.write(report).await {
            debug!(
                operation_id = %self.options.operation_id,
                error = %write_err,
                context,
                "error report write failed"
            );
        }
    }

    async fn replay_history(&self, source: &dyn EventSource) {
        match source
            .history(&self.options.operation_id, HISTORY_FETCH_LIMIT)
            .await
        {
            Ok(mut events) => {
                // Sources may return newest-first; the wire is chronological.
                events.sort_by_key(|event| event.timestamp.unwrap_or(0));
                for event in events {
                    // Replay offsets compare as raw strings. Ids are
                    // millisecond timestamps, so equal-width ids order
                    // correctly; the comparison breaks across a
                    // power-of-ten boundary.
                    if event.id().as_str() <= self.options.last_event_id.as_str() {
                        continue;
                    }
                    let envelope = EventEnvelope::wrap(event, &self.options.operation_id);
                    if let Err(err) = self.write(envelope).await {
                        warn!(
                            operation_id = %self.options.operation_id,
                            error = %err,
                            "history replay write failed"
                        );
                        return;
                    }
                }
            }
            Err(err) => {
                warn!(operation_id = %self.options.operation_id, error = %err, "history fetch failed");
                self.report_error(&err, "history_loading").await;
            }
        }
    }

    async fn pump_live(&self, source: Arc<dyn EventSource>) {
        let (batch_tx, mut batch_rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);

        let operation_id = self.options.operation_id.clone();
        let from_event_id = self.options.last_event_id.clone();
        let cancel = self.cancel.clone();
        let subscription = async move {
            source
                .subscribe(&operation_id, &from_event_id, batch_tx, cancel)
                .await
        };
        tokio::pin!(subscription);
        let mut subscription_done = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = &mut subscription, if !subscription_done => {
                    subscription_done = true;
                    if let Err(err) = result
                        && !err.is_cancelled()
                    {
                        warn!(
                            operation_id = %self.options.operation_id,
                            error = %err,
                            "live subscription failed"
                        );
                        self.report_error(&err, "stream_subscription").await;
                    }
                }
                batch = batch_rx.recv() => match batch {
                    Some(events) => {
                        if self.deliver(events).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    }

    /// Write one live batch. Returns `true` once the connection has ended
    /// and the caller should stop pumping.
    async fn deliver(&self, events: Vec<StreamEvent>) -> bool {
        for event in events {
            if self.ended.load(Ordering::SeqCst) {
                // Anything after the terminal marker is dropped.
                return true;
            }

            if let Some(timestamp) = event.timestamp {
                debug!(
                    operation_id = %self.options.operation_id,
                    event_type = %event.event_type,
                    latency_ms = now_millis() - timestamp,
                    "delivering live event"
                );
            }

            let terminal = event.is_terminal();
            let envelope = EventEnvelope::wrap(event, &self.options.operation_id);
            if let Err(err) = self.write(envelope).await {
                warn!(
                    operation_id = %self.options.operation_id,
                    error = %err,
                    "live event write failed"
                );
                self.finish();
                return true;
            }
            if terminal {
                self.finish();
                return true;
            }
        }
        false
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = time::interval(HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.ended.load(Ordering::SeqCst) {
                        break;
                    }
                    let beat =
                        EventEnvelope::control(event_type::HEARTBEAT, &self.options.operation_id);
                    if let Err(err) = self.write(beat).await {
                        debug!(
                            operation_id = %self.options.operation_id,
                            error = %err,
                            "heartbeat write failed; stopping timer"
                        );
                        break;
                    }
                }
            }
        }
    }
}
