//! Writing bundles to disk.

use crate::error::{BuilderError, Result};
use fastpack_util::fs::atomic_write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Destination for bundle output.
pub trait FileWriter: Send + Sync {
    /// # Errors
    ///
    /// Returns a write error naming `path`.
    fn write(&self, path: &Path, contents: &str) -> Result<()>;
}

/// Writes through a temp file and rename, creating parent directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsWriter;

impl FileWriter for FsWriter {
    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        atomic_write(path, contents.as_bytes()).map_err(|source| BuilderError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Keeps written files in memory.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    files: Mutex<Vec<(std::path::PathBuf, String)>>,
}

impl MemoryWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last contents written to `path`.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<String> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, c)| c.clone())
    }

    /// Number of writes so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.files.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl FileWriter for MemoryWriter {
    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((path.to_path_buf(), contents.to_string()));
        Ok(())
    }
}
