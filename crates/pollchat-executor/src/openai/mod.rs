//! OpenAI-compatible chat completions over server-sent events.

pub mod client;
pub mod protocol;
pub mod sse;

pub use client::OpenAiClient;
pub use protocol::{DEFAULT_BASE_URL, normalize_base_url};
pub use sse::{SseStreamParser, StreamEvent};
