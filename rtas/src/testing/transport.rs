//! In-memory transport for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

use crate::errors::TransportError;
use crate::transport::{CommandOutput, Transport};

/// One call made against an [`InMemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// A local file was uploaded to the remote path.
    Put {
        /// Local source.
        local: String,
        /// Remote destination.
        remote: String,
    },
    /// A remote file was downloaded to the local path.
    Get {
        /// Remote source.
        remote: String,
        /// Local destination.
        local: String,
    },
    /// A command was run.
    Run(String),
    /// A path existence check was made.
    Exists(String),
}

/// A fake host with an in-memory filesystem.
///
/// Uploads and downloads move bytes between the real local filesystem and
/// the in-memory remote one. Commands are answered from scripted results
/// first; otherwise `touch`, `rm -f`, `mkdir -p`, `test -e`, and
/// `sha256sum` act on the remote filesystem and anything else succeeds with
/// empty output.
#[derive(Debug)]
pub struct InMemoryTransport {
    host: String,
    identity: String,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    commands: Mutex<HashMap<String, CommandOutput>>,
    failing_puts: Mutex<HashSet<String>>,
    failing_gets: Mutex<HashSet<String>>,
    unreachable: Mutex<bool>,
    journal: Mutex<Vec<TransportCall>>,
}

impl InMemoryTransport {
    /// Creates a transport for `host` acting as `identity`.
    #[must_use]
    pub fn new(host: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            identity: identity.into(),
            files: Mutex::new(BTreeMap::new()),
            dirs: Mutex::new(BTreeSet::new()),
            commands: Mutex::new(HashMap::new()),
            failing_puts: Mutex::new(HashSet::new()),
            failing_gets: Mutex::new(HashSet::new()),
            unreachable: Mutex::new(false),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Seeds a remote file.
    #[must_use]
    pub fn with_remote_file(self, path: &str, content: impl AsRef<[u8]>) -> Self {
        self.write_remote_file(path, content);
        self
    }

    /// Scripts the result of an exact command line.
    #[must_use]
    pub fn with_command(self, command: &str, output: CommandOutput) -> Self {
        self.script_command(command, output);
        self
    }

    /// Makes uploads to `remote_path` fail.
    #[must_use]
    pub fn with_failing_put(self, remote_path: &str) -> Self {
        self.failing_puts.lock().insert(remote_path.to_string());
        self
    }

    /// Makes downloads of `remote_path` fail.
    #[must_use]
    pub fn with_failing_get(self, remote_path: &str) -> Self {
        self.failing_gets.lock().insert(remote_path.to_string());
        self
    }

    /// Writes or replaces a remote file.
    pub fn write_remote_file(&self, path: &str, content: impl AsRef<[u8]>) {
        self.files.lock().insert(path.to_string(), content.as_ref().to_vec());
    }

    /// Scripts the result of an exact command line.
    pub fn script_command(&self, command: &str, output: CommandOutput) {
        self.commands.lock().insert(command.to_string(), output);
    }

    /// Makes every call fail with a connection error.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock() = unreachable;
    }

    /// Returns a remote file's content.
    #[must_use]
    pub fn remote_file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().get(path).cloned()
    }

    /// Returns true if a remote file or directory exists.
    #[must_use]
    pub fn remote_exists(&self, path: &str) -> bool {
        self.files.lock().contains_key(path) || self.dirs.lock().contains(path)
    }

    /// Returns every call made so far.
    #[must_use]
    pub fn journal(&self) -> Vec<TransportCall> {
        self.journal.lock().clone()
    }

    /// Returns the command lines run so far.
    #[must_use]
    pub fn commands_run(&self) -> Vec<String> {
        self.journal
            .lock()
            .iter()
            .filter_map(|c| match c {
                TransportCall::Run(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns how many times `command` was run.
    #[must_use]
    pub fn run_count(&self, command: &str) -> usize {
        self.commands_run().iter().filter(|c| *c == command).count()
    }

    fn check_reachable(&self) -> Result<(), TransportError> {
        if *self.unreachable.lock() {
            return Err(TransportError::Connection {
                host: self.host.clone(),
                message: "host unreachable".to_string(),
            });
        }
        Ok(())
    }

    fn builtin(&self, command: &str) -> CommandOutput {
        let args = split_args(command);
        let Some((program, rest)) = args.split_first() else {
            return CommandOutput::success("");
        };
        let operands: Vec<&String> = rest.iter().filter(|a| !a.starts_with('-')).collect();

        match program.as_str() {
            "touch" => {
                let mut files = self.files.lock();
                for path in operands {
                    files.entry(path.clone()).or_default();
                }
                CommandOutput::success("")
            }
            "rm" => {
                let mut files = self.files.lock();
                for path in operands {
                    files.remove(path.as_str());
                }
                CommandOutput::success("")
            }
            "mkdir" => {
                self.dirs.lock().extend(operands.into_iter().cloned());
                CommandOutput::success("")
            }
            "test" => {
                let exists = operands.iter().all(|p| self.remote_exists(p));
                if exists {
                    CommandOutput::success("")
                } else {
                    CommandOutput::failure(1, "")
                }
            }
            "sha256sum" => {
                let files = self.files.lock();
                let mut stdout = String::new();
                for path in operands {
                    match files.get(path.as_str()) {
                        Some(content) => {
                            let digest = hex::encode(Sha256::digest(content));
                            stdout.push_str(&format!("{digest}  {path}\n"));
                        }
                        None => {
                            return CommandOutput::failure(
                                1,
                                format!("sha256sum: {path}: No such file or directory"),
                            );
                        }
                    }
                }
                CommandOutput::success(stdout)
            }
            _ => CommandOutput::success(""),
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn host(&self) -> &str {
        &self.host
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<(), TransportError> {
        self.journal.lock().push(TransportCall::Put {
            local: local_path.display().to_string(),
            remote: remote_path.to_string(),
        });
        self.check_reachable()?;
        if self.failing_puts.lock().contains(remote_path) {
            return Err(TransportError::Transfer {
                path: local_path.display().to_string(),
                message: "injected put failure".to_string(),
            });
        }

        let content = tokio::fs::read(local_path)
            .await
            .map_err(|e| TransportError::Transfer {
                path: local_path.display().to_string(),
                message: e.to_string(),
            })?;
        self.write_remote_file(remote_path, content);
        Ok(())
    }

    async fn get(&self, remote_path: &str, local_path: &Path) -> Result<(), TransportError> {
        self.journal.lock().push(TransportCall::Get {
            remote: remote_path.to_string(),
            local: local_path.display().to_string(),
        });
        self.check_reachable()?;
        if self.failing_gets.lock().contains(remote_path) {
            return Err(TransportError::Transfer {
                path: remote_path.to_string(),
                message: "injected get failure".to_string(),
            });
        }

        let content = self
            .remote_file(remote_path)
            .ok_or_else(|| TransportError::Transfer {
                path: remote_path.to_string(),
                message: "No such file or directory".to_string(),
            })?;
        tokio::fs::write(local_path, content).await?;
        Ok(())
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, TransportError> {
        self.journal.lock().push(TransportCall::Run(command.to_string()));
        self.check_reachable()?;

        let scripted = self.commands.lock().get(command).cloned();
        Ok(scripted.unwrap_or_else(|| self.builtin(command)))
    }

    async fn path_exists(&self, remote_path: &str) -> Result<bool, TransportError> {
        self.journal
            .lock()
            .push(TransportCall::Exists(remote_path.to_string()));
        self.check_reachable()?;
        Ok(self.remote_exists(remote_path))
    }
}

/// Splits a command line into words, honouring single quotes.
fn split_args(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;
    let mut escaped = false;

    for c in command.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\'' => {
                quoted = !quoted;
                in_word = true;
            }
            '\\' if !quoted => {
                escaped = true;
                in_word = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        args.push(current);
    }
    args
}
