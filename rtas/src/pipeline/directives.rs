//! Optional directives accepted by every phase builder.

use std::path::PathBuf;

use crate::core::{Action, Label};
use crate::predicates::UpToDate;

/// Directives attached to the units a builder produces.
///
/// For local phases `targets` and `file_dep` are local paths that become
/// declared outputs and inputs. For the remote phase they are remote paths:
/// `targets` adds a remote-paths-exist check and `file_dep` a remote
/// fingerprint check, while `local_file_dep` lists local declared inputs.
/// File phases follow the direction of the transfer: for shipping,
/// `targets` are remote and `file_dep` local; for fetching, `targets` are
/// local and `file_dep` remote. Their `doc` prefixes each per-file unit's
/// documentation.
#[derive(Debug, Clone, Default)]
pub struct TaskDirectives {
    /// Output paths.
    pub targets: Vec<PathBuf>,
    /// Input paths.
    pub file_dep: Vec<PathBuf>,
    /// Local inputs of a remote step.
    pub local_file_dep: Vec<PathBuf>,
    /// Extra up-to-date checks.
    pub up_to_date: Vec<UpToDate>,
    /// Extra dependency labels.
    pub task_dep: Vec<Label>,
    /// Teardown invocables.
    pub teardown: Vec<Action>,
    /// Documentation string.
    pub doc: Option<String>,
}

impl TaskDirectives {
    /// Creates empty directives.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds output paths.
    #[must_use]
    pub fn targets(mut self, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.targets.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Adds input paths.
    #[must_use]
    pub fn file_dep(mut self, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.file_dep.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Adds local inputs of a remote step.
    #[must_use]
    pub fn local_file_dep(mut self, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.local_file_dep.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Adds an up-to-date check.
    #[must_use]
    pub fn up_to_date(mut self, check: UpToDate) -> Self {
        self.up_to_date.push(check);
        self
    }

    /// Marks the unit as run-once.
    #[must_use]
    pub fn run_once(self) -> Self {
        self.up_to_date(UpToDate::run_once())
    }

    /// Adds a dependency label.
    #[must_use]
    pub fn task_dep(mut self, label: impl Into<Label>) -> Self {
        self.task_dep.push(label.into());
        self
    }

    /// Adds a teardown invocable.
    #[must_use]
    pub fn teardown(mut self, action: Action) -> Self {
        self.teardown.push(action);
        self
    }

    /// Sets the documentation string.
    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub(crate) fn remote_targets(&self) -> Vec<String> {
        self.targets.iter().map(|p| p.to_string_lossy().into_owned()).collect()
    }

    pub(crate) fn remote_file_dep(&self) -> Vec<String> {
        self.file_dep.iter().map(|p| p.to_string_lossy().into_owned()).collect()
    }
}
