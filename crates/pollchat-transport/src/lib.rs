//! Host-facing output for poll-driven chat streaming.
//!
//! Provides:
//! - Host payload (JSON, one object per invocation)
//! - Markdown rendering of the conversation

pub mod protocol;
pub mod render;

pub use protocol::{HostResponse, RERUN_INTERVAL, STREAM_MARKER, STREAMING_NOW};
pub use render::markdown_chat;
