//! Streaming protocol: the per-connection session driver and the wire
//! writer abstraction it pushes envelopes through.

mod session;
mod writer;

pub use session::{HEARTBEAT_INTERVAL, HISTORY_FETCH_LIMIT, SessionOptions, StreamSession};
pub use writer::{ChannelWriter, StreamWriter};
