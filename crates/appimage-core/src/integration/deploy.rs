use std::path::{Path, PathBuf};

use appimage_utils::fs::{copy_atomic, safe_remove};
use tracing::{trace, warn};

use crate::error::{from_fs_error, AppImageError, Result};

/// Artifacts written during one integration attempt.
#[derive(Debug, Default)]
pub struct Deployment {
    written: Vec<PathBuf>,
}

impl Deployment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically writes `data` to `path` with `mode` and records it for rollback.
    pub fn write(&mut self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        let mut reader = data;
        copy_atomic(&mut reader, path, mode).map_err(from_fs_error)?;
        trace!(path = %path.display(), bytes = data.len(), "deployed artifact");
        if !self.written.iter().any(|p| p == path) {
            self.written.push(path.to_path_buf());
        }
        Ok(())
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    pub fn into_written(self) -> Vec<PathBuf> {
        self.written
    }

    /// Removes every recorded artifact, newest first.
    ///
    /// # Errors
    ///
    /// [`AppImageError::OperationFailed`] naming the artifacts that could not be removed.
    pub fn rollback(self) -> Result<()> {
        let mut leftovers = Vec::new();
        for path in self.written.iter().rev() {
            if let Err(err) = safe_remove(path) {
                warn!(path = %path.display(), error = %err, "rollback could not remove artifact");
                leftovers.push(path.display().to_string());
            }
        }

        if leftovers.is_empty() {
            Ok(())
        } else {
            Err(AppImageError::OperationFailed(format!(
                "rollback left {}",
                leftovers.join(", ")
            )))
        }
    }
}
