//! Core traits for the completion service and the worker launcher.

use async_trait::async_trait;
use thiserror::Error;

use crate::{FinishReason, Message};

/// Outbound chat completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub model: String,
    /// Sent ahead of the history when present.
    pub system_prompt: Option<String>,
    /// Already trimmed to the context window.
    pub history: Vec<Message>,
}

/// Completion service error.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("{0}")]
    Config(String),
    #[error("Request failed: {0}")]
    Transport(String),
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },
    #[error("Stream aborted: {0}")]
    Stream(String),
}

/// A streaming chat completion service.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Stream a completion, calling `on_delta` for every text increment.
    ///
    /// Returns the last finish reason reported by the service, if any.
    async fn stream_chat(
        &self,
        request: &ChatRequest,
        on_delta: &mut (dyn for<'d> FnMut(&'d str) + Send),
    ) -> Result<Option<FinishReason>, CompletionError>;
}

/// Arguments and environment for a worker process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnSpec {
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl SpawnSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Launcher error.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Starts detached worker processes.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Spawn a worker that outlives the caller; returns its process id.
    async fn spawn(&self, spec: &SpawnSpec) -> Result<u32, LaunchError>;
}
