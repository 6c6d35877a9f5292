//! Abstract event source behind the streaming protocol.
//!
//! The protocol never talks to a concrete store: a session is handed an
//! [`EventSource`] and only ever asks it for a bounded history window and a
//! live push subscription. [`MemoryEventBus`] is a ready in-process
//! implementation; production deployments put a persistent/pub-sub store
//! behind the same trait.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::StreamEvent;

mod memory;
pub use memory::MemoryEventBus;

/// Live batches are pushed through this sender.
pub type BatchSender = mpsc::Sender<Vec<StreamEvent>>;

/// Store and fan-out serving all concurrent streaming connections.
///
/// One source serves many subscribers per operation; cancelling one
/// subscriber must not affect the others.
#[async_trait]
pub trait EventSource: Send + Sync + 'static {
    /// The most recent events recorded for an operation, up to `limit`.
    /// Newest-first order is acceptable; the session reorders for the wire.
    async fn history(&self, operation_id: &str, limit: usize) -> Result<Vec<StreamEvent>>;

    /// Push live event batches for an operation into `batches` until the
    /// token is cancelled or the source shuts down.
    ///
    /// Events at or below the `from_event_id` offset must not be delivered.
    /// A clean shutdown or cancellation resolves to `Ok(())` (or
    /// [`RelayError::Cancelled`](crate::RelayError::Cancelled), which the
    /// session treats the same way); any other error is reported to the
    /// client in-band.
    async fn subscribe(
        &self,
        operation_id: &str,
        from_event_id: &str,
        batches: BatchSender,
        cancel: CancellationToken,
    ) -> Result<()>;
}
