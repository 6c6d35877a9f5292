//! Wire writer abstraction for the push channel.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{RelayError, Result};
use crate::types::EventEnvelope;

/// Serializes envelopes onto one client's push channel.
///
/// A write error means the channel can no longer accept frames; callers log
/// and stop rather than raise, because an open push channel has no way to
/// fail back to the client.
#[async_trait]
pub trait StreamWriter: Send + Sync {
    async fn write(&self, envelope: EventEnvelope) -> Result<()>;
}

/// Writer backed by an in-process channel. The transport end drains the
/// receiver and frames each envelope for its wire; dropping the receiver
/// makes subsequent writes fail with [`RelayError::ChannelClosed`].
pub struct ChannelWriter {
    tx: mpsc::Sender<EventEnvelope>,
}

impl ChannelWriter {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EventEnvelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl StreamWriter for ChannelWriter {
    async fn write(&self, envelope: EventEnvelope) -> Result<()> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| RelayError::ChannelClosed)
    }
}
