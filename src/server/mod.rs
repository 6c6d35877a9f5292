//! Axum adapter exposing operation streams over SSE.
//!
//! One `GET` endpoint per deployment: the client supplies `operationId`, an
//! optional `lastEventId` resumption offset, and an optional `includeHistory`
//! flag; the response is a long-lived SSE body carrying one JSON envelope per
//! `data:` frame. The protocol's own heartbeat keeps the connection warm, so
//! no SSE keep-alive comments are configured.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::source::EventSource;
use crate::stream::{ChannelWriter, SessionOptions, StreamSession};
use crate::types::EventEnvelope;

const WRITE_CHANNEL_CAPACITY: usize = 64;

/// Query parameters accepted by the stream endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub operation_id: Option<String>,
    pub last_event_id: Option<String>,
    /// Boolean carried as a string in the query (`"true"` or `"1"`).
    pub include_history: Option<String>,
}

impl StreamQuery {
    fn include_history(&self) -> bool {
        matches!(self.include_history.as_deref(), Some("true") | Some("1"))
    }
}

/// Shared state behind the stream routes.
#[derive(Clone)]
pub struct StreamState {
    source: Arc<dyn EventSource>,
}

impl StreamState {
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self { source }
    }
}

/// Router exposing `GET /operations/stream`.
pub fn router(source: Arc<dyn EventSource>) -> Router {
    Router::new()
        .route("/operations/stream", get(stream_operation))
        .with_state(StreamState::new(source))
}

/// Open a long-lived SSE channel that replays and follows one operation.
///
/// A missing `operationId` is rejected with a structured 400 payload before
/// any stream is opened.
pub async fn stream_operation(
    State(state): State<StreamState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let include_history = query.include_history();
    let options = match SessionOptions::from_request(
        query.operation_id,
        query.last_event_id,
        include_history,
    ) {
        Ok(options) => options,
        Err(err) => {
            let body = axum::Json(serde_json::json!({ "error": err.to_string() }));
            return (StatusCode::BAD_REQUEST, body).into_response();
        }
    };

    let (writer, rx) = ChannelWriter::new(WRITE_CHANNEL_CAPACITY);
    let session = StreamSession::new(options, Box::new(writer));
    let disconnect = DisconnectGuard(session.cancel_token());
    tokio::spawn(session.run(state.source.clone()));

    Sse::new(envelope_stream(rx, disconnect)).into_response()
}

/// SSE body: one `data:` JSON frame per envelope. The guard travels with the
/// stream; dropping the body (client disconnect) cancels the session.
fn envelope_stream(
    mut rx: mpsc::Receiver<EventEnvelope>,
    disconnect: DisconnectGuard,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    async_stream::stream! {
        let _disconnect = disconnect;
        while let Some(envelope) = rx.recv().await {
            yield Ok(sse_frame(&envelope));
        }
    }
}

fn sse_frame(envelope: &EventEnvelope) -> Event {
    match Event::default().json_data(envelope) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "envelope serialization failed");
            Event::default().comment("serialization failed")
        }
    }
}

/// Cancels the session when the client's response stream is dropped.
struct DisconnectGuard(CancellationToken);

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_history_parses_truthy_strings() {
        for (raw, expected) in [
            (Some("true"), true),
            (Some("1"), true),
            (Some("false"), false),
            (Some("yes"), false),
            (None, false),
        ] {
            let query = StreamQuery {
                include_history: raw.map(str::to_string),
                ..StreamQuery::default()
            };
            assert_eq!(query.include_history(), expected, "raw: {raw:?}");
        }
    }
}
