//! Remote transport collaborator.
//!
//! The engine never moves bytes itself. Every ship, fetch, command, and
//! existence check goes through a [`Transport`], one per registered identity.

mod fingerprint;
mod identity;
mod ssh;

pub use fingerprint::{FingerprintEntry, FingerprintTracker};
pub use identity::IdentitySet;
pub use ssh::SshTransport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use crate::errors::{RemoteCommandError, TransportError};

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit status.
    pub exit_code: i32,
}

impl CommandOutput {
    /// A successful result with the given stdout.
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// A failed result.
    #[must_use]
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Returns true if the command exited zero with an empty error channel.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.exit_code == 0 && self.stderr.trim().is_empty()
    }

    /// Converts into trimmed stdout, or a typed error for an unclean result.
    pub fn into_result(self, command: &str) -> Result<String, RemoteCommandError> {
        if self.is_clean() {
            Ok(self.stdout.trim().to_string())
        } else {
            Err(RemoteCommandError::new(
                command,
                self.exit_code,
                self.stderr.trim(),
            ))
        }
    }
}

/// Byte-level file copy and command execution against one host as one identity.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// The host identifier.
    fn host(&self) -> &str;

    /// The identity (remote user) this transport acts as.
    fn identity(&self) -> &str;

    /// Copies a local file to the host.
    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<(), TransportError>;

    /// Copies a remote file to the local machine.
    async fn get(&self, remote_path: &str, local_path: &Path) -> Result<(), TransportError>;

    /// Runs a shell command on the host.
    async fn run(&self, command: &str) -> Result<CommandOutput, TransportError>;

    /// Checks whether a path exists on the host.
    async fn path_exists(&self, remote_path: &str) -> Result<bool, TransportError>;
}

/// A transport shared between builders and the units they emit.
pub type SharedTransport = Arc<dyn Transport>;

/// Quotes a string for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:=@%,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_clean() {
        let out = CommandOutput::success("  hello\n");
        assert!(out.is_clean());
        assert_eq!(out.into_result("echo hello").unwrap(), "hello");
    }

    #[test]
    fn test_stderr_alone_fails() {
        let out = CommandOutput {
            stdout: "partial".to_string(),
            stderr: "warning: deprecated\n".to_string(),
            exit_code: 0,
        };
        let err = out.into_result("make").unwrap_err();
        assert_eq!(err.exit_code, 0);
        assert_eq!(err.stderr, "warning: deprecated");
    }

    #[test]
    fn test_nonzero_exit_fails() {
        let err = CommandOutput::failure(2, "").into_result("false").unwrap_err();
        assert_eq!(err.exit_code, 2);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/tmp/done"), "/tmp/done");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
