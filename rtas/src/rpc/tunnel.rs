//! SSH port-forwarding tunnel to the remote execution service.

use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::SshConfig;
use crate::errors::ActionError;

/// A running `ssh -N -L` process.
///
/// The process is killed by [`SshTunnel::release`], or when the tunnel is
/// dropped.
#[derive(Debug)]
pub struct SshTunnel {
    host: String,
    local_port: u16,
    remote_port: u16,
    child: Option<Child>,
}

impl SshTunnel {
    /// Builds the ssh arguments for forwarding `local_port` to `remote_port`
    /// on the host's loopback interface.
    #[must_use]
    pub fn forward_args(host: &str, ssh: &SshConfig, local_port: u16, remote_port: u16) -> Vec<String> {
        let mut args = ssh.common_args("-p");
        args.extend([
            "-N".to_string(),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
            "-L".to_string(),
            format!("{local_port}:localhost:{remote_port}"),
            format!("{}@{host}", ssh.user),
        ]);
        args
    }

    /// Starts the tunnel.
    pub async fn acquire(
        host: &str,
        ssh: &SshConfig,
        local_port: u16,
        remote_port: u16,
    ) -> Result<Self, ActionError> {
        let child = Command::new("ssh")
            .args(Self::forward_args(host, ssh, local_port, remote_port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ActionError::Connection(format!("cannot start tunnel to {host}: {e}")))?;

        info!(host, local_port, remote_port, "tunnel started");
        Ok(Self {
            host: host.to_string(),
            local_port,
            remote_port,
            child: Some(child),
        })
    }

    /// Returns the local end of the tunnel.
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Returns the forwarded port on the host.
    #[must_use]
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Returns true while the ssh process is alive.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Stops the tunnel.
    pub async fn release(mut self) -> Result<(), ActionError> {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!(host = %self.host, error = %e, "tunnel already gone");
            }
            debug!(host = %self.host, local_port = self.local_port, "tunnel released");
        }
        Ok(())
    }
}
