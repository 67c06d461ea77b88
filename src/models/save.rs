use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Describes one image written to disk by the streaming save helpers.
///
/// An empty path means nothing was saved: `save_single_image` returns that
/// when the stream finished without an image artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResult {
    full_path: PathBuf,
}

impl SaveResult {
    pub fn new(full_path: impl Into<PathBuf>) -> Self {
        Self {
            full_path: full_path.into(),
        }
    }

    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    pub fn is_saved(&self) -> bool {
        !self.full_path.as_os_str().is_empty()
    }

    pub fn into_path(self) -> PathBuf {
        self.full_path
    }
}
