//! Remote steps: shell commands or calls into the remote execution service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::core::{ActionResult, Label};
use crate::errors::ActionError;
use crate::rpc::ServiceSlot;
use crate::transport::SharedTransport;

/// A function call executed inside the remote execution service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCall {
    /// Module previously uploaded to the service.
    pub module: String,
    /// Function name within the module.
    pub function: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl RemoteCall {
    /// Creates a call with no arguments.
    #[must_use]
    pub fn new(module: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Sets a keyword argument.
    #[must_use]
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }
}

/// One step of the remote phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteStep {
    /// A shell command run through the active transport.
    Command {
        /// The command line.
        command: String,
    },
    /// A function call run through the host's service session.
    RemoteCall(RemoteCall),
}

impl RemoteStep {
    /// A shell command step.
    #[must_use]
    pub fn command(command: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
        }
    }

    /// A remote call step.
    #[must_use]
    pub fn call(call: RemoteCall) -> Self {
        Self::RemoteCall(call)
    }

    /// Short text used in logs and action names.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Command { command } => command.clone(),
            Self::RemoteCall(call) => format!("{}.{}", call.module, call.function),
        }
    }

    pub(crate) async fn execute(
        &self,
        transport: &SharedTransport,
        service: &ServiceSlot,
        label: &Label,
    ) -> ActionResult {
        let host = transport.host();
        match self {
            Self::Command { command } => {
                let output = transport.run(command).await.map_err(|e| {
                    error!(host, label = %label, command = %command, error = %e, "remote command could not run");
                    ActionError::from(e)
                })?;

                if output.is_clean() {
                    info!(host, label = %label, command = %command, stdout = %output.stdout.trim(), "remote command succeeded");
                } else {
                    error!(host, label = %label, command = %command, exit_code = output.exit_code, stderr = %output.stderr.trim(), "remote command failed");
                }
                Ok(Value::String(output.into_result(command)?))
            }
            Self::RemoteCall(call) => {
                let client = service.client().await.ok_or_else(|| {
                    ActionError::Connection(format!(
                        "no remote execution service session on {host}"
                    ))
                })?;
                let result = client
                    .exec_action(&call.module, &call.function, call.args.clone(), call.kwargs.clone())
                    .await;
                match &result {
                    Ok(value) => {
                        info!(host, label = %label, call = %self.describe(), result = %value, "remote call succeeded");
                    }
                    Err(e) => {
                        error!(host, label = %label, call = %self.describe(), error = %e, "remote call failed");
                    }
                }
                result
            }
        }
    }
}

impl From<&str> for RemoteStep {
    fn from(command: &str) -> Self {
        Self::command(command)
    }
}

impl From<String> for RemoteStep {
    fn from(command: String) -> Self {
        Self::command(command)
    }
}

impl From<RemoteCall> for RemoteStep {
    fn from(call: RemoteCall) -> Self {
        Self::RemoteCall(call)
    }
}
