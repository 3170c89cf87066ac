//! Scoped ownership of exported audio files.
//!
//! Every normalized, trimmed or chunked export is allocated from an arena;
//! the arena's directory is removed when it is closed or dropped, so
//! cancelled and failed invocations leave nothing behind.

use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// What an arena held when it was inspected or closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub files_allocated: usize,
    pub bytes_on_disk: u64,
}

/// Directory of temporary exports owned by one scope.
#[derive(Debug)]
pub struct TempArena {
    dir: TempDir,
    allocated: AtomicUsize,
}

impl TempArena {
    /// Creates an arena under the system temp directory.
    pub fn new(label: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("polycaption-{}-", label))
            .tempdir()
            .map_err(|e| PipelineError::ExportFailed {
                message: format!("cannot create temp directory: {}", e),
            })?;
        Ok(Self {
            dir,
            allocated: AtomicUsize::new(0),
        })
    }

    /// Directory holding this arena's files.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Reserves a fresh path `<kind>-<seq>.<extension>` inside the arena.
    ///
    /// The file itself is not created.
    pub fn allocate(&self, kind: &str, extension: &str) -> PathBuf {
        let seq = self.allocated.fetch_add(1, Ordering::SeqCst);
        self.dir
            .path()
            .join(format!("{}-{:04}.{}", kind, seq, extension))
    }

    /// Counts allocations and the bytes currently on disk.
    pub fn stats(&self) -> CleanupStats {
        let bytes_on_disk = std::fs::read_dir(self.dir.path())
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter_map(|entry| entry.metadata().ok())
                    .filter(|meta| meta.is_file())
                    .map(|meta| meta.len())
                    .sum()
            })
            .unwrap_or(0);
        CleanupStats {
            files_allocated: self.allocated.load(Ordering::SeqCst),
            bytes_on_disk,
        }
    }

    /// Deletes the arena and reports what it held.
    pub fn close(self) -> Result<CleanupStats> {
        let stats = self.stats();
        self.dir.close()?;
        tracing::debug!(
            files = stats.files_allocated,
            bytes = stats.bytes_on_disk,
            "temp arena removed"
        );
        Ok(stats)
    }
}
