//! Conversation log persisted through the durable store.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::store::{DurableStore, StoreError};

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single conversation entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered message history stored as a JSON array in a single file.
///
/// Not safe for concurrent writers: only the foreground process mutates the
/// log, and it never overlaps with itself.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    path: PathBuf,
    store: DurableStore,
}

impl ConversationLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, store: DurableStore) -> Self {
        Self {
            path: path.into(),
            store,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the log with an empty history if it does not exist.
    ///
    /// # Errors
    /// Returns error if the parent directory or the file cannot be created.
    pub fn ensure(&self) -> Result<(), StoreError> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        self.write(&[])
    }

    /// Read the full history. A missing or empty file is an empty history.
    ///
    /// # Errors
    /// Returns error if the file is unreadable, sealed with another key, or
    /// not a well-formed message array.
    pub fn read(&self) -> Result<Vec<Message>, StoreError> {
        let Some(data) = self.store.read(&self.path)? else {
            return Ok(Vec::new());
        };
        if data.trim_ascii().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&data).map_err(|e| StoreError::json(&self.path, e))
    }

    /// Replace the full history.
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub fn write(&self, messages: &[Message]) -> Result<(), StoreError> {
        self.store.write_json(&self.path, &messages)
    }

    /// Append one message with a read-modify-write round trip.
    ///
    /// # Errors
    /// Returns error if the read or the write fails.
    pub fn append(&self, message: Message) -> Result<Vec<Message>, StoreError> {
        let mut messages = self.read()?;
        messages.push(message);
        self.write(&messages)?;
        tracing::debug!(len = messages.len(), "Appended message to conversation log");
        Ok(messages)
    }
}

/// The last `max` messages; `max <= 0` keeps everything.
#[must_use]
pub fn trim_context(messages: &[Message], max: i64) -> &[Message] {
    match usize::try_from(max) {
        Ok(max) if max > 0 && messages.len() > max => &messages[messages.len() - max..],
        _ => messages,
    }
}
