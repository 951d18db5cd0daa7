//! File transfer descriptors for the ship and fetch phases.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One file to ship or fetch.
///
/// For shipping, `source` is local and `target` remote. For fetching,
/// `source` is remote and `target` local. When `target` is absent the
/// destination is the phase directory joined with the source's base name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    /// Where the file is read from.
    pub source: PathBuf,
    /// Explicit destination path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,
    /// Delete the local copy in teardown.
    #[serde(default)]
    pub clean_local: bool,
    /// Delete the remote copy in teardown.
    #[serde(default)]
    pub clean_remote: bool,
}

impl FileSpec {
    /// Creates a descriptor with no cleanup.
    #[must_use]
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: None,
            clean_local: false,
            clean_remote: false,
        }
    }

    /// Sets an explicit destination.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Deletes the local copy after the unit runs.
    #[must_use]
    pub fn clean_local(mut self) -> Self {
        self.clean_local = true;
        self
    }

    /// Deletes the remote copy after the unit runs.
    #[must_use]
    pub fn clean_remote(mut self) -> Self {
        self.clean_remote = true;
        self
    }

    /// Returns the source's base name.
    #[must_use]
    pub fn basename(&self) -> Option<String> {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    /// Resolves the destination against a phase directory.
    #[must_use]
    pub fn destination(&self, dir: &Path) -> Option<PathBuf> {
        match &self.target {
            Some(target) => Some(target.clone()),
            None => self.basename().map(|name| dir.join(name)),
        }
    }

    /// Returns true if either cleanup flag is set.
    #[must_use]
    pub fn has_cleanup(&self) -> bool {
        self.clean_local || self.clean_remote
    }
}

impl From<&str> for FileSpec {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<PathBuf> for FileSpec {
    fn from(source: PathBuf) -> Self {
        Self::new(source)
    }
}
