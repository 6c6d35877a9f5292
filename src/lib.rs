//! tracewire
//!
//! Reliable reconstruction of streaming agent execution traces. Two tightly
//! coupled pieces:
//!
//! - [`types::merge_tool_call_deltas`] folds the partial tool-call fragments a
//!   language model emits into complete, addressable call records, tolerating
//!   out-of-order, duplicated, and parallel partial updates.
//! - [`stream::StreamSession`] republishes a running operation's events to
//!   remote observers over a long-lived push channel, with replay-from-offset,
//!   liveness heartbeats, and a single deterministic termination path.
//!
//! The store behind the protocol is abstracted as [`source::EventSource`];
//! [`source::MemoryEventBus`] is a ready in-process implementation. With the
//! `server-adapters` feature (on by default) the [`server`] module exposes the
//! protocol as an Axum SSE endpoint.
#![deny(unsafe_code)]

pub mod error;
pub mod source;
pub mod stream;
pub mod types;

#[cfg(feature = "server-adapters")]
pub mod server;

pub use error::RelayError;

/// Common imports for working with tracewire.
pub mod prelude {
    pub use crate::error::{RelayError, Result};
    pub use crate::source::{EventSource, MemoryEventBus};
    pub use crate::stream::{SessionOptions, StreamSession, StreamWriter};
    pub use crate::types::{
        EventEnvelope, StreamEvent, ToolCallDelta, ToolCallRecord, event_type,
        merge_tool_call_deltas,
    };

    #[cfg(feature = "server-adapters")]
    pub use crate::server::router;
}
