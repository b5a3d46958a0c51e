//! Worker side of poll-driven chat streaming.
//!
//! Provides:
//! - Worker command building and the detached process launcher
//! - OpenAI-compatible streaming chat completions client
//! - `StreamingWorker` - Turns a completion stream into progress channel writes

pub mod command;
pub mod launcher;
pub mod openai;
pub mod worker;

pub use command::{CommandBuilder, CommandParts, worker_spec};
pub use launcher::{ProcessLauncher, terminate};
pub use openai::OpenAiClient;
pub use worker::{StreamingWorker, WorkerError, WorkerState};
