//! Scoped service sessions and the per-pipeline slot holding them.

use std::fmt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{JsonRpcClient, RemoteExecutionService, SshTunnel};
use crate::config::{ServiceConfig, SshConfig};
use crate::errors::ActionError;

/// A live connection to a host's execution service.
///
/// Acquire with [`ServiceSession::acquire`] and give it back with
/// [`ServiceSession::release`]. A dropped session still kills its tunnel.
pub struct ServiceSession {
    client: Arc<dyn RemoteExecutionService>,
    tunnel: Option<SshTunnel>,
}

impl ServiceSession {
    /// Wraps an already-connected client.
    #[must_use]
    pub fn from_client(client: Arc<dyn RemoteExecutionService>) -> Self {
        Self {
            client,
            tunnel: None,
        }
    }

    /// Opens the tunnel and connects to the service through it.
    pub async fn acquire(
        host: &str,
        ssh: &SshConfig,
        service: &ServiceConfig,
    ) -> Result<Self, ActionError> {
        let tunnel = SshTunnel::acquire(host, ssh, service.local_port, service.service_port).await?;

        match connect_with_retry(tunnel.local_port(), service).await {
            Ok(stream) => {
                info!(host, port = service.service_port, "connected to remote execution service");
                Ok(Self {
                    client: Arc::new(JsonRpcClient::new(stream, service.request_timeout())),
                    tunnel: Some(tunnel),
                })
            }
            Err(e) => {
                tunnel.release().await?;
                Err(e)
            }
        }
    }

    /// Returns the client.
    #[must_use]
    pub fn client(&self) -> Arc<dyn RemoteExecutionService> {
        Arc::clone(&self.client)
    }

    /// Closes the connection and the tunnel.
    pub async fn release(self) -> Result<(), ActionError> {
        drop(self.client);
        if let Some(tunnel) = self.tunnel {
            tunnel.release().await?;
        }
        Ok(())
    }
}

impl fmt::Debug for ServiceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSession")
            .field("tunnel", &self.tunnel)
            .finish_non_exhaustive()
    }
}

async fn connect_with_retry(port: u16, service: &ServiceConfig) -> Result<TcpStream, ActionError> {
    let attempts = service.connect_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(port, attempt, error = %e, "service not reachable yet");
                last_error = Some(e);
                tokio::time::sleep(service.connect_retry_delay()).await;
            }
        }
    }

    Err(ActionError::Connection(format!(
        "cannot reach service on local port {port} after {attempts} attempts: {}",
        last_error.map_or_else(String::new, |e| e.to_string())
    )))
}

/// Holds at most one session for a pipeline instance.
///
/// Cloning shares the slot; units built by the same pipeline see the same
/// session.
#[derive(Clone, Default)]
pub struct ServiceSlot {
    inner: Arc<Mutex<Option<ServiceSession>>>,
}

impl ServiceSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a session, releasing any previous one.
    pub async fn install(&self, session: ServiceSession) {
        let previous = self.inner.lock().await.replace(session);
        if let Some(previous) = previous {
            if let Err(e) = previous.release().await {
                warn!(error = %e, "failed to release replaced service session");
            }
        }
    }

    /// Returns the client of the current session.
    pub async fn client(&self) -> Option<Arc<dyn RemoteExecutionService>> {
        self.inner.lock().await.as_ref().map(ServiceSession::client)
    }

    /// Returns true if a session is stored.
    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    /// Releases the current session. Returns false if the slot was empty.
    pub async fn release(&self) -> Result<bool, ActionError> {
        let session = self.inner.lock().await.take();
        match session {
            Some(session) => {
                session.release().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl fmt::Debug for ServiceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSlot").finish_non_exhaustive()
    }
}
