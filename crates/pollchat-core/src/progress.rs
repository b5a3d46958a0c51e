//! Single-slot progress channel between the streaming worker and the poller.
//!
//! The channel is one file holding the latest [`ProgressRecord`]. Every write
//! replaces the whole record. The worker handle (the spawned process id) lives
//! in a plaintext sibling file and is removed together with the record.

use std::{
    fmt,
    fs::{self, File},
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::store::{DurableStore, StoreError, remove_files};

/// Why a stream ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    #[serde(rename = "stop", alias = "normal")]
    Normal,
    #[serde(rename = "length")]
    Length,
    #[serde(rename = "content_filter")]
    ContentFilter,
}

impl FinishReason {
    /// Map a completion service finish reason; anything unrecognised is normal.
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        match value {
            "length" => Self::Length,
            "content_filter" => Self::ContentFilter,
            _ => Self::Normal,
        }
    }
}

/// Token identifying which turn owns the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// A new generation from the wall clock in nanoseconds.
    #[must_use]
    pub fn fresh() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
        Self(nanos)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Generation {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

fn finish_reason_from_wire<'de, D>(deserializer: D) -> Result<Option<FinishReason>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .filter(|reason| !reason.is_empty())
        .map(|reason| FinishReason::from_wire(&reason)))
}

/// Latest state of a streaming turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Text accumulated so far.
    #[serde(default)]
    pub content: String,
    /// Empty or absent while the stream is running; unknown reasons read as normal.
    #[serde(
        default,
        deserialize_with = "finish_reason_from_wire",
        skip_serializing_if = "Option::is_none"
    )]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<Generation>,
}

impl ProgressRecord {
    /// No further writes will follow this record.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.finish_reason.is_some() || self.error.is_some()
    }
}

/// `true` when a non-terminal record has not been written for longer than `timeout`.
#[must_use]
pub fn is_stalled(record: &ProgressRecord, age: Duration, timeout: Duration) -> bool {
    !record.is_terminal() && age > timeout
}

/// Progress channel error.
#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("No stream in progress")]
    Missing,
    #[error("Stream belongs to a newer turn")]
    Superseded,
    #[error("Invalid worker handle: {0:?}")]
    InvalidHandle(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handle to the progress file and its worker handle sibling.
///
/// A channel created with [`ProgressChannel::new`] belongs to the foreground:
/// its [`reset`](Self::reset) starts a new generation unconditionally. A
/// channel [`bound`](Self::bound) to a generation belongs to a worker: its
/// writes are dropped with [`ProgressError::Superseded`] once the record on
/// disk is gone or carries another generation.
#[derive(Debug, Clone)]
pub struct ProgressChannel {
    path: PathBuf,
    handle_path: PathBuf,
    store: DurableStore,
    generation: Option<Generation>,
}

impl ProgressChannel {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, handle_path: impl Into<PathBuf>, store: DurableStore) -> Self {
        Self {
            path: path.into(),
            handle_path: handle_path.into(),
            store,
            generation: None,
        }
    }

    /// Restrict writes to records of `generation`.
    #[must_use]
    pub const fn bound(mut self, generation: Generation) -> Self {
        self.generation = Some(generation);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn handle_path(&self) -> &Path {
        &self.handle_path
    }

    #[must_use]
    pub const fn generation(&self) -> Option<Generation> {
        self.generation
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write an empty, non-terminal record.
    ///
    /// # Errors
    /// Returns error if the write fails or the channel was superseded.
    pub fn reset(&self) -> Result<Generation, ProgressError> {
        let generation = self.generation.unwrap_or_else(Generation::fresh);
        let record = ProgressRecord {
            generation: Some(generation),
            ..ProgressRecord::default()
        };
        if self.generation.is_some() {
            self.write_guarded(&record)?;
        } else {
            self.store.write_json(&self.path, &record)?;
        }
        Ok(generation)
    }

    /// Overwrite with the text accumulated so far.
    ///
    /// # Errors
    /// Returns error if the write fails or the channel was superseded.
    pub fn publish(&self, content: &str) -> Result<(), ProgressError> {
        self.write_guarded(&ProgressRecord {
            content: content.to_string(),
            generation: self.generation,
            ..ProgressRecord::default()
        })
    }

    /// Overwrite with a terminal record for a cleanly finished stream.
    ///
    /// # Errors
    /// Returns error if the write fails or the channel was superseded.
    pub fn finish(&self, content: &str, reason: FinishReason) -> Result<(), ProgressError> {
        self.write_guarded(&ProgressRecord {
            content: content.to_string(),
            finish_reason: Some(reason),
            generation: self.generation,
            error: None,
        })
    }

    /// Overwrite with a terminal record carrying an error and the partial content.
    ///
    /// # Errors
    /// Returns error if the write fails or the channel was superseded.
    pub fn fail(&self, content: &str, error: &str) -> Result<(), ProgressError> {
        self.write_guarded(&ProgressRecord {
            content: content.to_string(),
            error: Some(error.to_string()),
            generation: self.generation,
            finish_reason: None,
        })
    }

    /// Read the current record without consuming it.
    ///
    /// An empty file reads as an empty, non-terminal record.
    ///
    /// # Errors
    /// Returns [`ProgressError::Missing`] if no stream was started, or a store
    /// error if the record cannot be read or parsed.
    pub fn peek(&self) -> Result<ProgressRecord, ProgressError> {
        let data = self.store.read(&self.path)?.ok_or(ProgressError::Missing)?;
        if data.trim_ascii().is_empty() {
            return Ok(ProgressRecord::default());
        }
        serde_json::from_slice(&data)
            .map_err(|e| ProgressError::Store(StoreError::json(&self.path, e)))
    }

    /// Time since the record was last written.
    ///
    /// # Errors
    /// Returns error if the file is missing or has no modification time.
    pub fn age(&self, now: SystemTime) -> Result<Duration, ProgressError> {
        let modified = fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ProgressError::Missing,
                _ => ProgressError::Store(StoreError::io(&self.path, e)),
            })?;
        // A timestamp in the future counts as fresh.
        Ok(now.duration_since(modified).unwrap_or(Duration::ZERO))
    }

    /// Record the spawned worker's process id.
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub fn write_handle(&self, pid: u32) -> Result<(), ProgressError> {
        DurableStore::default().write(&self.handle_path, pid.to_string().as_bytes())?;
        Ok(())
    }

    /// The recorded worker process id, if any.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or does not hold a number.
    pub fn read_handle(&self) -> Result<Option<u32>, ProgressError> {
        let Some(data) = DurableStore::default().read(&self.handle_path)? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&data);
        text.trim()
            .parse()
            .map(Some)
            .map_err(|_| ProgressError::InvalidHandle(text.into_owned()))
    }

    /// Delete the record and the worker handle.
    pub fn discard(&self) {
        remove_files([self.path.as_path(), self.handle_path.as_path()]);
    }

    /// Mark the record as written at `time`.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or its time set.
    pub fn set_modified(&self, time: SystemTime) -> Result<(), ProgressError> {
        File::options()
            .write(true)
            .open(&self.path)
            .and_then(|f| f.set_modified(time))
            .map_err(|e| ProgressError::Store(StoreError::io(&self.path, e)))
    }

    fn write_guarded(&self, record: &ProgressRecord) -> Result<(), ProgressError> {
        if let Some(mine) = self.generation {
            match self.peek() {
                Ok(current) => match current.generation {
                    Some(theirs) if theirs != mine => return Err(ProgressError::Superseded),
                    _ => {}
                },
                Err(ProgressError::Missing) => return Err(ProgressError::Superseded),
                Err(e) => tracing::warn!("Overwriting unreadable progress record: {e}"),
            }
        }
        self.store.write_json(&self.path, record)?;
        Ok(())
    }
}
