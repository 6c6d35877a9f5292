//! Core data model: tool call records and execution events.

mod event;
mod tool_call;

pub use event::{EventEnvelope, StreamEvent, event_type};
pub use tool_call::{
    FunctionCall, FunctionCallDelta, ToolCallDelta, ToolCallKind, ToolCallRecord,
    merge_tool_call_deltas,
};

pub(crate) use event::now_millis;
