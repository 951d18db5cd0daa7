//! Configuration for transports, fetch destinations, and the remote
//! execution service.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtasConfig {
    /// SSH connection settings.
    #[serde(default)]
    pub ssh: SshConfig,
    /// Default local directory for fetched files.
    #[serde(default = "default_fetch_dir")]
    pub fetch_dir: PathBuf,
    /// Remote execution service settings.
    #[serde(default)]
    pub service: ServiceConfig,
}

fn default_fetch_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

impl Default for RtasConfig {
    fn default() -> Self {
        Self {
            ssh: SshConfig::default(),
            fetch_dir: default_fetch_dir(),
            service: ServiceConfig::default(),
        }
    }
}

impl RtasConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Applies `RTAS_SSH_USER`, `RTAS_SSH_IDENTITY`, and `RTAS_FETCH_DIR`.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(user) = lookup("RTAS_SSH_USER") {
            self.ssh.user = user;
        }
        if let Some(identity) = lookup("RTAS_SSH_IDENTITY") {
            self.ssh.identity_file = Some(PathBuf::from(identity));
        }
        if let Some(dir) = lookup("RTAS_FETCH_DIR") {
            self.fetch_dir = PathBuf::from(dir);
        }
        self
    }

    /// Sets the SSH settings.
    #[must_use]
    pub fn with_ssh(mut self, ssh: SshConfig) -> Self {
        self.ssh = ssh;
        self
    }

    /// Sets the fetch directory.
    #[must_use]
    pub fn with_fetch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fetch_dir = dir.into();
        self
    }

    /// Sets the service settings.
    #[must_use]
    pub fn with_service(mut self, service: ServiceConfig) -> Self {
        self.service = service;
        self
    }
}

/// SSH connection settings shared by the transport and the tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    /// Remote user.
    #[serde(default = "default_user")]
    pub user: String,
    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Private key file.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Disable interactive prompts.
    #[serde(default = "default_true")]
    pub batch_mode: bool,
    /// Verify host keys against known_hosts.
    #[serde(default)]
    pub strict_host_key_checking: bool,
    /// Extra `-o` options.
    #[serde(default)]
    pub extra_options: Vec<String>,
}

fn default_user() -> String {
    "root".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            port: default_port(),
            identity_file: None,
            connect_timeout_secs: default_connect_timeout(),
            batch_mode: default_true(),
            strict_host_key_checking: false,
            extra_options: Vec::new(),
        }
    }
}

impl SshConfig {
    /// Creates SSH settings for a user.
    #[must_use]
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Self::default()
        }
    }

    /// Sets the identity file.
    #[must_use]
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Sets the port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builds the option arguments common to `ssh` and `scp`.
    ///
    /// `port_flag` is `-p` for ssh and `-P` for scp.
    #[must_use]
    pub fn common_args(&self, port_flag: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }

        if self.port != 22 {
            args.push(port_flag.to_string());
            args.push(self.port.to_string());
        }

        if self.batch_mode {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }

        args.push("-o".to_string());
        args.push(format!("ConnectTimeout={}", self.connect_timeout_secs));

        if !self.strict_host_key_checking {
            args.extend([
                "-o".to_string(),
                "StrictHostKeyChecking=no".to_string(),
                "-o".to_string(),
                "UserKnownHostsFile=/dev/null".to_string(),
            ]);
        }

        for opt in &self.extra_options {
            args.push("-o".to_string());
            args.push(opt.clone());
        }

        args
    }
}

/// Remote execution service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Local end of the SSH tunnel.
    #[serde(default = "default_local_port")]
    pub local_port: u16,
    /// Port the service listens on, on the host.
    #[serde(default = "default_service_port")]
    pub service_port: u16,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Connection attempts while the tunnel comes up.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Delay between connection attempts in milliseconds.
    #[serde(default = "default_connect_retry_delay")]
    pub connect_retry_delay_ms: u64,
}

fn default_local_port() -> u16 {
    18356
}

fn default_service_port() -> u16 {
    7777
}

fn default_request_timeout() -> u64 {
    600
}

fn default_connect_attempts() -> u32 {
    10
}

fn default_connect_retry_delay() -> u64 {
    300
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            local_port: default_local_port(),
            service_port: default_service_port(),
            request_timeout_secs: default_request_timeout(),
            connect_attempts: default_connect_attempts(),
            connect_retry_delay_ms: default_connect_retry_delay(),
        }
    }
}

impl ServiceConfig {
    /// Gets the request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Gets the retry delay as a Duration.
    #[must_use]
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}
