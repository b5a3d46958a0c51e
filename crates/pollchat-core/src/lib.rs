//! Core building blocks for poll-driven chat streaming.
//!
//! This crate provides the pieces shared by the foreground poller and the
//! detached streaming worker:
//! - `Config` - Explicit configuration built once at process entry
//! - `Envelope` - Optional at-rest encryption of persisted payloads
//! - `DurableStore` - Atomic write-then-rename file storage
//! - `ConversationLog` - Role-tagged message history
//! - `ProgressChannel` - Single-slot record moving stream state between processes
//! - Completion and launcher traits

pub mod config;
pub mod conversation;
pub mod envelope;
pub mod progress;
pub mod store;
pub mod traits;

pub use config::{Config, ConfigError};
pub use conversation::{ConversationLog, Message, Role, trim_context};
pub use envelope::{Envelope, EnvelopeError};
pub use progress::{
    FinishReason, Generation, ProgressChannel, ProgressError, ProgressRecord, is_stalled,
};
pub use store::{DurableStore, StoreError};
pub use traits::{
    ChatRequest, CompletionBackend, CompletionError, LaunchError, Launcher, SpawnSpec,
};
