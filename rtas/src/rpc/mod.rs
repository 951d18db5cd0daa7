//! Remote execution service: a long-running process on the host that loads
//! uploaded modules and runs their functions on request.
//!
//! The service is reached through an SSH tunnel. [`ServiceSession`] owns the
//! tunnel and the client; [`ServiceSlot`] holds at most one live session per
//! pipeline instance so remote-call steps can find it at run time.

mod client;
mod session;
mod setup;
mod tunnel;

pub use client::{JsonRpcClient, RpcErrorBody, RpcRequest, RpcResponse};
pub use session::{ServiceSession, ServiceSlot};
pub use setup::{setup_remote_service, ServiceSetup, LAUNCH_SCRIPT_NAME};
pub use tunnel::SshTunnel;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;

use crate::errors::ActionError;

/// Operations offered by the remote execution service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteExecutionService: Send + Sync {
    /// Transfers a local source file and loads it under `module_name`.
    async fn upload_module(&self, local_path: &Path, module_name: &str) -> Result<(), ActionError>;

    /// Runs a function of a loaded module and returns its result.
    async fn exec_action(
        &self,
        module: &str,
        function: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, ActionError>;
}
