//! The outbox: an append-only JSON-lines journal of pending records.
//!
//! One record per line, newline-terminated, each line parseable on its own.
//! Appends are durable (`sync_data`) before they return success, so a
//! post-crash reader always sees every acknowledged record. Truncation
//! rewrites through a temp file and an atomic rename; a partial truncate
//! that drops undelivered lines would be a data-loss bug.
//!
//! Exactly one writer exists per process; all file access is serialized
//! behind one async mutex, and drain-time readers are additionally
//! serialized behind the batcher's flush lock.

use serde_json::Value;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Hard cap on the outbox file; appends beyond it assert backpressure.
pub const MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

/// Warning threshold (80% of the cap).
pub const WARN_FILE_BYTES: u64 = MAX_FILE_BYTES / 5 * 4;

/// Parsed head of the journal.
#[derive(Debug)]
pub struct HeadSlice {
    /// The first lines of the file, in order. `None` marks a line that did
    /// not parse as JSON (logged; it is truncated away with its prefix).
    pub entries: Vec<Option<Value>>,
    /// Total number of lines currently in the file.
    pub total_lines: usize,
}

struct OutboxFile {
    file: File,
    size: u64,
}

/// Journaled append-only log of pending records.
pub struct Outbox {
    path: PathBuf,
    state: Mutex<OutboxFile>,
    shutdown: AtomicBool,
}

impl Outbox {
    /// Open (or create) the outbox at `<data_dir>/queue/outbox.log`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory or file cannot be
    /// created.
    pub async fn open(data_dir: &Path) -> StoreResult<Self> {
        let queue_dir = data_dir.join("queue");
        tokio::fs::create_dir_all(&queue_dir).await?;
        let path = queue_dir.join("outbox.log");

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let size = file.metadata().await?.len();

        debug!(path = %path.display(), bytes = size, "Opened outbox");
        Ok(Self {
            path,
            state: Mutex::new(OutboxFile { file, size }),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Refuse all further appends. Called once draining begins.
    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Whether appends are refused.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Durably append one record as a JSON line.
    ///
    /// Returns the file size after the append. The write is synced to disk
    /// before this returns, so the record survives a crash.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Shutdown`] once draining has begun.
    /// - [`StoreError::Backpressure`] when the file already exceeds
    ///   [`MAX_FILE_BYTES`] (nothing is written), or when this append pushes
    ///   it over the cap (the line *is* durable and will be delivered; the
    ///   caller must still refuse new work).
    /// - [`StoreError::Io`] / [`StoreError::Serialization`] on failure.
    pub async fn append(&self, record: &Value) -> StoreResult<u64> {
        if self.is_shut_down() {
            return Err(StoreError::Shutdown);
        }

        let mut line =
            serde_json::to_vec(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        line.push(b'\n');

        let mut state = self.state.lock().await;

        // A saturated journal is never grown further.
        if state.size > MAX_FILE_BYTES {
            return Err(StoreError::Backpressure { bytes: state.size });
        }

        state.file.write_all(&line).await?;
        state.file.sync_data().await?;
        state.size += line.len() as u64;

        let size = state.size;
        drop(state);

        if size > MAX_FILE_BYTES {
            warn!(bytes = size, "Outbox exceeded size cap; asserting backpressure");
            return Err(StoreError::Backpressure { bytes: size });
        }
        if size > WARN_FILE_BYTES {
            warn!(bytes = size, cap = MAX_FILE_BYTES, "Outbox nearing capacity");
        }
        Ok(size)
    }

    /// Read the first `n` lines of the journal.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be read.
    pub async fn stream_head(&self, n: usize) -> StoreResult<HeadSlice> {
        let _state = self.state.lock().await;
        let content = tokio::fs::read_to_string(&self.path).await?;

        let mut entries = Vec::new();
        let mut total_lines = 0usize;
        for line in content.lines() {
            if line.is_empty() {
                continue;
            }
            total_lines += 1;
            if entries.len() < n {
                match serde_json::from_str::<Value>(line) {
                    Ok(value) => entries.push(Some(value)),
                    Err(e) => {
                        warn!(line = total_lines, error = %e, "Skipping unparseable outbox line");
                        entries.push(None);
                    },
                }
            }
        }

        Ok(HeadSlice {
            entries,
            total_lines,
        })
    }

    /// Number of lines currently journaled.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be read.
    pub async fn line_count(&self) -> StoreResult<usize> {
        Ok(self.stream_head(0).await?.total_lines)
    }

    /// Current file size in bytes.
    pub async fn len_bytes(&self) -> u64 {
        self.state.lock().await.size
    }

    /// Whether the journal holds no records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be read.
    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.line_count().await? == 0)
    }

    /// Remove the first `k` lines, crash-safely.
    ///
    /// The remainder is written to a temp file in the same directory,
    /// synced, and atomically renamed over the journal, so a crash leaves
    /// either the old file or the new one, never a torn prefix.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the rewrite fails.
    pub async fn truncate_prefix(&self, k: usize) -> StoreResult<()> {
        if k == 0 {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        let content = tokio::fs::read_to_string(&self.path).await?;

        let mut remainder = String::with_capacity(content.len());
        for line in content.lines().filter(|l| !l.is_empty()).skip(k) {
            remainder.push_str(line);
            remainder.push('\n');
        }

        let path = self.path.clone();
        let remainder_len = remainder.len() as u64;
        tokio::task::spawn_blocking(move || atomic_replace(&path, remainder.as_bytes()))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;

        // The append handle points at the old inode; reopen.
        state.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        state.size = remainder_len;

        debug!(removed = k, bytes = remainder_len, "Truncated outbox prefix");
        Ok(())
    }
}

/// Write-to-temp-then-rename in the target's directory.
fn atomic_replace(path: &Path, content: &[u8]) -> StoreResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    // Sync before the rename so a power loss cannot leave a truncated
    // journal behind the new name.
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("path", &self.path)
            .field("shutdown", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn open_outbox(dir: &TempDir) -> Outbox {
        Outbox::open(dir.path()).await.unwrap()
    }

    #[tokio::test]
    async fn append_then_read_back() {
        let dir = TempDir::new().unwrap();
        let outbox = open_outbox(&dir).await;

        outbox.append(&json!({"id": "a", "n": 1})).await.unwrap();
        outbox.append(&json!({"id": "b", "n": 2})).await.unwrap();

        let head = outbox.stream_head(10).await.unwrap();
        assert_eq!(head.total_lines, 2);
        assert_eq!(head.entries[0].as_ref().unwrap()["id"], "a");
        assert_eq!(head.entries[1].as_ref().unwrap()["id"], "b");
    }

    #[tokio::test]
    async fn lines_parse_independently() {
        let dir = TempDir::new().unwrap();
        let outbox = open_outbox(&dir).await;
        outbox.append(&json!({"id": "a"})).await.unwrap();
        outbox.append(&json!({"id": "b"})).await.unwrap();

        let content = tokio::fs::read_to_string(outbox.path()).await.unwrap();
        for line in content.lines() {
            serde_json::from_str::<Value>(line).unwrap();
        }
        assert!(content.ends_with('\n'));
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let outbox = open_outbox(&dir).await;
            outbox.append(&json!({"id": "persisted"})).await.unwrap();
        }
        let outbox = open_outbox(&dir).await;
        let head = outbox.stream_head(1).await.unwrap();
        assert_eq!(head.total_lines, 1);
        assert_eq!(head.entries[0].as_ref().unwrap()["id"], "persisted");
    }

    #[tokio::test]
    async fn truncate_prefix_removes_oldest() {
        let dir = TempDir::new().unwrap();
        let outbox = open_outbox(&dir).await;
        for i in 0..5 {
            outbox.append(&json!({"n": i})).await.unwrap();
        }

        outbox.truncate_prefix(3).await.unwrap();

        let head = outbox.stream_head(10).await.unwrap();
        assert_eq!(head.total_lines, 2);
        assert_eq!(head.entries[0].as_ref().unwrap()["n"], 3);
    }

    #[tokio::test]
    async fn truncate_all_yields_empty_file() {
        let dir = TempDir::new().unwrap();
        let outbox = open_outbox(&dir).await;
        outbox.append(&json!({"n": 0})).await.unwrap();
        outbox.truncate_prefix(1).await.unwrap();

        assert!(outbox.is_empty().await.unwrap());
        assert_eq!(outbox.len_bytes().await, 0);
    }

    #[tokio::test]
    async fn append_after_truncate_lands_in_new_file() {
        let dir = TempDir::new().unwrap();
        let outbox = open_outbox(&dir).await;
        outbox.append(&json!({"n": 0})).await.unwrap();
        outbox.truncate_prefix(1).await.unwrap();
        outbox.append(&json!({"n": 1})).await.unwrap();

        let head = outbox.stream_head(10).await.unwrap();
        assert_eq!(head.total_lines, 1);
        assert_eq!(head.entries[0].as_ref().unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn shutdown_refuses_appends() {
        let dir = TempDir::new().unwrap();
        let outbox = open_outbox(&dir).await;
        outbox.begin_shutdown();

        let err = outbox.append(&json!({"n": 0})).await.unwrap_err();
        assert!(matches!(err, StoreError::Shutdown));
    }

    #[tokio::test]
    async fn saturated_file_rejects_without_growing() {
        let dir = TempDir::new().unwrap();
        let outbox = open_outbox(&dir).await;

        // Force the cached size over the cap the way a full journal would.
        {
            let mut state = outbox.state.lock().await;
            state.size = MAX_FILE_BYTES + 1024;
        }
        let before = tokio::fs::metadata(outbox.path()).await.unwrap().len();

        let err = outbox.append(&json!({"n": 0})).await.unwrap_err();
        assert!(matches!(err, StoreError::Backpressure { .. }));

        let after = tokio::fs::metadata(outbox.path()).await.unwrap().len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn malformed_line_is_surfaced_as_none() {
        let dir = TempDir::new().unwrap();
        let outbox = open_outbox(&dir).await;
        outbox.append(&json!({"id": "good"})).await.unwrap();

        tokio::fs::write(
            outbox.path(),
            "{\"id\":\"good\"}\nnot json at all\n{\"id\":\"tail\"}\n",
        )
        .await
        .unwrap();

        let head = outbox.stream_head(10).await.unwrap();
        assert_eq!(head.total_lines, 3);
        assert!(head.entries[0].is_some());
        assert!(head.entries[1].is_none());
        assert!(head.entries[2].is_some());
    }
}
