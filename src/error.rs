//! Error types for tracewire.

use thiserror::Error;

/// Errors surfaced by the merge and streaming layers.
///
/// Errors that originate inside an open push channel are never raised through
/// the transport; the session converts them to in-band error events. The
/// variants here cover everything that can be propagated to a caller.
#[derive(Error, Debug)]
pub enum RelayError {
    /// A tool call fragment cannot be promoted to a record because a required
    /// structural field is absent. Carries the offending field path.
    #[error("invalid tool call delta: missing required field {path:?}")]
    SchemaError { path: Vec<String> },

    /// A required request parameter is absent. Rejected before any stream is
    /// opened.
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    /// The event source failed to produce history for an operation.
    #[error("history fetch failed: {0}")]
    HistoryError(String),

    /// The live subscription failed for a reason other than cancellation.
    #[error("subscription error: {0}")]
    SubscriptionError(String),

    /// The subscription was cancelled by the client or the session.
    #[error("subscription cancelled")]
    Cancelled,

    /// The push channel can no longer accept writes.
    #[error("stream channel closed")]
    ChannelClosed,

    /// JSON serialization failed on the wire path.
    #[error("JSON error: {0}")]
    JsonError(String),
}

impl RelayError {
    /// Whether this error is a cooperative cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Schema error helper carrying a field path.
    pub fn schema<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::SchemaError {
            path: path.into_iter().map(Into::into).collect(),
        }
    }
}

/// Result type for tracewire operations.
pub type Result<T> = std::result::Result<T, RelayError>;
