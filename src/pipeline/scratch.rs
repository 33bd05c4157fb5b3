//! Scoped per-call scratch directories.
//!
//! Every conversion serializes its mip levels into a unique subdirectory of
//! the scratch root; the uuid name keeps concurrent conversions
//! collision-free, and the `Drop` impl guarantees deletion on every exit
//! path: success, encoder failure, or cancellation.

use crate::error::ConvertError;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// A uniquely named scratch directory, deleted when dropped.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create `root/{uuid}` (and the root itself if needed).
    pub fn new(root: &Path) -> Result<Self, ConvertError> {
        let path = root.join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&path).map_err(|e| {
            ConvertError::Configuration(format!(
                "failed to create scratch directory {}: {e}",
                path.display()
            ))
        })?;
        Ok(ScratchDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            // Never panic in Drop; a leak here is a warning, not a crash.
            warn!(
                "failed to remove scratch directory {}: {e}",
                self.path.display()
            );
        }
    }
}
