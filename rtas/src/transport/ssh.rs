//! Transport backed by the system `ssh` and `scp` binaries.

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{shell_quote, CommandOutput, Transport};
use crate::config::SshConfig;
use crate::errors::TransportError;

/// Exit status ssh reserves for its own failures.
const SSH_FAILURE_EXIT: i32 = 255;

/// An SSH transport for one host and one remote user.
#[derive(Debug, Clone)]
pub struct SshTransport {
    host: String,
    config: SshConfig,
}

impl SshTransport {
    /// Creates a transport for a host.
    #[must_use]
    pub fn new(host: impl Into<String>, config: SshConfig) -> Self {
        Self {
            host: host.into(),
            config,
        }
    }

    /// Returns the SSH settings.
    #[must_use]
    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.config.user, self.host)
    }

    fn scp_remote(&self, remote_path: &str) -> String {
        // IPv6 literals must be bracketed for scp.
        if self.host.contains(':') {
            format!("{}@[{}]:{remote_path}", self.config.user, self.host)
        } else {
            format!("{}:{remote_path}", self.destination())
        }
    }

    fn ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = self.config.common_args("-p");
        args.push(self.destination());
        args.push(command.to_string());
        args
    }

    async fn scp(&self, from: String, to: String, path: &str) -> Result<(), TransportError> {
        let mut args = self.config.common_args("-P");
        args.push("-q".to_string());
        args.push(from);
        args.push(to);

        let output = Command::new("scp")
            .args(&args)
            .output()
            .await
            .map_err(|e| TransportError::Connection {
                host: self.host.clone(),
                message: format!("cannot spawn scp: {e}"),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(TransportError::Transfer {
                path: path.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn host(&self) -> &str {
        &self.host
    }

    fn identity(&self) -> &str {
        &self.config.user
    }

    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<(), TransportError> {
        debug!(host = %self.host, local = %local_path.display(), remote_path, "put");
        self.scp(
            local_path.display().to_string(),
            self.scp_remote(remote_path),
            &local_path.display().to_string(),
        )
        .await
    }

    async fn get(&self, remote_path: &str, local_path: &Path) -> Result<(), TransportError> {
        debug!(host = %self.host, remote_path, local = %local_path.display(), "get");
        self.scp(
            self.scp_remote(remote_path),
            local_path.display().to_string(),
            remote_path,
        )
        .await
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, TransportError> {
        let output = Command::new("ssh")
            .args(self.ssh_args(command))
            .output()
            .await
            .map_err(|e| TransportError::Connection {
                host: self.host.clone(),
                message: format!("cannot spawn ssh: {e}"),
            })?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        };

        if result.exit_code == SSH_FAILURE_EXIT {
            warn!(host = %self.host, stderr = %result.stderr.trim(), "ssh connection failed");
            return Err(TransportError::Connection {
                host: self.host.clone(),
                message: result.stderr.trim().to_string(),
            });
        }

        Ok(result)
    }

    async fn path_exists(&self, remote_path: &str) -> Result<bool, TransportError> {
        let output = self
            .run(&format!("test -e {}", shell_quote(remote_path)))
            .await?;
        match output.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(TransportError::Connection {
                host: self.host.clone(),
                message: format!("unexpected exit {code} checking {remote_path}"),
            }),
        }
    }
}
