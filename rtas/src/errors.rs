//! Error types for the RTAS engine.
//!
//! Construction-time problems surface as [`RtasError`]; anything raised while
//! an emitted action runs surfaces as [`ActionError`] and funnels through the
//! failure guard.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::core::Label;

/// The main error type for building pipelines and batches.
#[derive(Debug, Error)]
pub enum RtasError {
    /// Fixed remote step and remote step iterator were both used in one namespace.
    #[error("Namespace '{namespace}' already uses the {existing} remote step mode")]
    RemoteModeConflict {
        /// The namespace being built.
        namespace: String,
        /// The mode that was set first.
        existing: &'static str,
    },

    /// A builder needs a transport but no identity is active.
    #[error("Host '{host}' has no active identity")]
    NoActiveIdentity {
        /// The host identifier.
        host: String,
    },

    /// An identity name was not registered on the pipeline.
    #[error("Host '{host}' has no identity named '{identity}'")]
    UnknownIdentity {
        /// The host identifier.
        host: String,
        /// The requested identity.
        identity: String,
    },

    /// A builder or sub-sequence was requested before `begin_super`.
    #[error("Host '{host}' has no super sequence; call begin_super first")]
    NoSuperSequence {
        /// The host identifier.
        host: String,
    },

    /// A remote step was appended after the iterator was finalized.
    #[error("Remote step iterator of '{namespace}' is already finalized")]
    RemoteStepsFinalized {
        /// The namespace being built.
        namespace: String,
    },

    /// A new sub-sequence was begun while the current namespace was not drained.
    #[error("Namespace '{namespace}' was not drained before starting a new sequence")]
    UndrainedSequence {
        /// The namespace with pending phases.
        namespace: String,
    },

    /// The same namespace was drained twice.
    #[error("Namespace '{namespace}' was already consumed")]
    AlreadyConsumed {
        /// The consumed namespace.
        namespace: String,
    },

    /// Two units in one namespace would share a label.
    #[error("Duplicate task label '{0}'")]
    DuplicateLabel(Label),

    /// A task unit failed construction-time validation.
    #[error("Invalid task unit '{label}': {reason}")]
    InvalidUnit {
        /// The unit label.
        label: Label,
        /// Why the unit is invalid.
        reason: String,
    },

    /// A batch or sequence name was empty.
    #[error("Sequence name cannot be empty or whitespace-only")]
    EmptyName,

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error while preparing local files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A remote command that wrote to its error channel or exited non-zero.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Remote command '{command}' failed with exit code {exit_code}: {stderr}")]
pub struct RemoteCommandError {
    /// The command that was run.
    pub command: String,
    /// The exit status reported by the transport.
    pub exit_code: i32,
    /// Trimmed error channel output.
    pub stderr: String,
}

impl RemoteCommandError {
    /// Creates a new remote command error.
    #[must_use]
    pub fn new(command: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }
}

/// Errors raised by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel to the host could not be established or broke.
    #[error("Connection to '{host}' failed: {message}")]
    Connection {
        /// The host identifier.
        host: String,
        /// Failure detail.
        message: String,
    },

    /// A file copy failed.
    #[error("Transfer of '{path}' failed: {message}")]
    Transfer {
        /// The path being copied.
        path: String,
        /// Failure detail.
        message: String,
    },

    /// IO error on the local side.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while an emitted action, teardown, or predicate runs.
#[derive(Debug, Error)]
pub enum ActionError {
    /// A put or get raised.
    #[error("Transfer failed for '{path}': {message}")]
    Transfer {
        /// The file being copied.
        path: String,
        /// Failure detail.
        message: String,
    },

    /// A remote command failed.
    #[error("{0}")]
    RemoteCommand(#[from] RemoteCommandError),

    /// A tunnel, SSH, or RPC channel failure.
    #[error("Connection failure: {0}")]
    Connection(String),

    /// The remote execution service raised while running a function.
    #[error("Remote call {module}.{function} raised {kind}: {message}")]
    RemoteCall {
        /// The module holding the function.
        module: String,
        /// The function name.
        function: String,
        /// Remote exception type name.
        kind: String,
        /// Remote exception message.
        message: String,
    },

    /// The failure guard short-circuited the action.
    #[error("Host aborted after failure of '{cause_label}'")]
    Aborted {
        /// Label of the unit whose failure aborted the host.
        cause_label: Label,
    },

    /// A user-supplied local callable failed.
    #[error("{0}")]
    Local(#[from] anyhow::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ActionError {
    /// Returns a short name for the error class, used in outcome records.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transfer { .. } => "transfer",
            Self::RemoteCommand(_) => "remote_command",
            Self::Connection(_) => "connection",
            Self::RemoteCall { .. } => "remote_call",
            Self::Aborted { .. } => "aborted",
            Self::Local(_) => "local",
            Self::Io(_) => "io",
        }
    }
}

impl From<TransportError> for ActionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connection { host, message } => {
                Self::Connection(format!("{host}: {message}"))
            }
            TransportError::Transfer { path, message } => Self::Transfer { path, message },
            TransportError::Io(e) => Self::Io(e),
        }
    }
}

/// Error raised when a produced graph is not well formed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphValidationError {
    /// Two units share a label.
    #[error("Duplicate task label '{0}'")]
    DuplicateLabel(Label),

    /// A unit depends on a label that no unit carries.
    #[error("Task '{label}' depends on unknown task '{dependency}'")]
    MissingDependency {
        /// The dependent unit.
        label: Label,
        /// The unresolved dependency.
        dependency: Label,
    },

    /// The dependency graph contains a cycle.
    #[error("Cycle detected in task graph: {}", render_cycle(.0))]
    CycleDetected(Vec<Label>),
}

fn render_cycle(path: &[Label]) -> String {
    path.iter()
        .map(Label::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Error raised when loading configuration fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Cannot read config file '{path}': {source}")]
    Read {
        /// The config path.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// The file was not valid JSON for the config schema.
    #[error("Cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<ConfigError> for RtasError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
