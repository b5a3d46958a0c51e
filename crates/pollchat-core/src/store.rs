//! Atomic file storage with an optional encryption envelope.
//!
//! Every write lands in a uniquely named temporary sibling first, is synced,
//! and is then renamed over the destination. Readers therefore only ever see
//! the complete previous payload or the complete new one.

use std::{
    fs::{self, File},
    io::{ErrorKind, Write as _},
    path::{Path, PathBuf},
};

use thiserror::Error;
use uuid::Uuid;

use crate::envelope::{Envelope, EnvelopeError};

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("Malformed payload in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the error means the stored bytes could not be interpreted,
    /// as opposed to the filesystem failing.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Envelope(_) | Self::Json { .. })
    }
}

/// Durable store writing through an [`Envelope`].
#[derive(Debug, Clone, Default)]
pub struct DurableStore {
    envelope: Envelope,
}

impl DurableStore {
    #[must_use]
    pub const fn new(envelope: Envelope) -> Self {
        Self { envelope }
    }

    /// Read and open the payload at `path`; `Ok(None)` if the file is absent.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or the envelope cannot be opened.
    pub fn read(&self, path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        if data.is_empty() {
            return Ok(Some(data));
        }
        Ok(Some(self.envelope.open(&data)?))
    }

    /// Seal `bytes` and atomically replace the file at `path`.
    ///
    /// # Errors
    /// Returns error if sealing, writing the temporary file or renaming fails.
    pub fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        self.stage(path, bytes)?.commit()
    }

    /// Serialize `value` as JSON and write it.
    ///
    /// # Errors
    /// Returns error if serialization or the write fails.
    pub fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let data = serde_json::to_vec(value).map_err(|e| StoreError::json(path, e))?;
        self.write(path, &data)
    }

    /// Write the sealed payload to a temporary sibling without publishing it.
    ///
    /// The destination is untouched until [`StagedWrite::commit`].
    ///
    /// # Errors
    /// Returns error if sealing or writing the temporary file fails.
    pub fn stage(&self, path: &Path, bytes: &[u8]) -> Result<StagedWrite, StoreError> {
        let payload = self.envelope.seal(bytes)?;
        let tmp_path = temp_sibling(path);

        let mut file = File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
        let written = file
            .write_all(&payload)
            .and_then(|()| file.sync_all());
        drop(file);

        let staged = StagedWrite {
            tmp_path,
            dest: path.to_path_buf(),
            committed: false,
        };
        written.map_err(|e| StoreError::io(&staged.tmp_path, e))?;
        Ok(staged)
    }
}

/// A payload written to a temporary file and awaiting the atomic rename.
///
/// Dropping it without committing removes the temporary file.
#[derive(Debug)]
pub struct StagedWrite {
    tmp_path: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl StagedWrite {
    /// Rename the temporary file over the destination.
    ///
    /// # Errors
    /// Returns error if the rename fails.
    pub fn commit(mut self) -> Result<(), StoreError> {
        fs::rename(&self.tmp_path, &self.dest).map_err(|e| StoreError::io(&self.dest, e))?;
        self.committed = true;
        Ok(())
    }

    #[must_use]
    pub fn temp_path(&self) -> &Path {
        &self.tmp_path
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Remove files, ignoring ones that are already gone.
pub fn remove_files<'a>(paths: impl IntoIterator<Item = &'a Path>) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), "Failed to remove file: {e}");
            }
        }
    }
}

// Same directory as the destination so the rename never crosses filesystems.
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "payload".into(), |n| n.to_string_lossy());
    path.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableStore::default();
        assert!(store.read(&dir.path().join("missing")).unwrap().is_none());
    }

    #[test]
    fn test_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.json");
        let store = DurableStore::new(Envelope::from_secret("s"));

        store.write(&path, b"first").unwrap();
        store.write(&path, b"second, longer").unwrap();

        assert_eq!(store.read(&path).unwrap().unwrap(), b"second, longer");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_uncommitted_write_leaves_destination_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        let store = DurableStore::default();
        store.write(&path, b"old complete payload").unwrap();

        // A writer killed between the temp write and the rename never runs Drop.
        let staged = store.stage(&path, b"new").unwrap();
        let tmp = staged.temp_path().to_path_buf();
        std::mem::forget(staged);

        assert!(tmp.exists());
        assert_eq!(fs::read(&path).unwrap(), b"old complete payload");
        assert_eq!(store.read(&path).unwrap().unwrap(), b"old complete payload");
    }

    #[test]
    fn test_dropped_stage_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.txt");
        let store = DurableStore::default();

        let staged = store.stage(&path, b"data").unwrap();
        let tmp = staged.temp_path().to_path_buf();
        drop(staged);

        assert!(!tmp.exists());
        assert!(!path.exists());
    }

    #[test]
    fn test_reader_without_secret_rejects_sealed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        DurableStore::new(Envelope::from_secret("s"))
            .write(&path, b"[]")
            .unwrap();

        let err = DurableStore::default().read(&path).unwrap_err();
        assert!(err.is_corruption());
        assert!(matches!(err, StoreError::Envelope(EnvelopeError::KeyRequired)));
    }

    #[test]
    fn test_remove_files_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("pid.txt");
        fs::write(&present, "42").unwrap();
        let missing = dir.path().join("nope");

        remove_files([present.as_path(), missing.as_path()]);
        assert!(!present.exists());
    }
}
