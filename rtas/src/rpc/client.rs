//! Line-delimited JSON client for the remote execution service.
//!
//! Each request is one JSON object terminated by a newline; the service
//! answers with one JSON object per request carrying either `result` or
//! `error`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;

use super::RemoteExecutionService;
use crate::errors::ActionError;

/// A request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Request id echoed by the response.
    pub id: u64,
    /// Operation name.
    pub method: String,
    /// Operation parameters.
    pub params: Value,
}

/// An exception raised inside the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Exception type name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Exception message.
    pub message: String,
}

/// A response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Id of the answered request.
    pub id: u64,
    /// Return value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Raised exception on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

/// Client speaking the service protocol over any byte stream.
///
/// Requests are serialised; one request is in flight at a time. Responses
/// to requests that timed out are discarded when they arrive later.
pub struct JsonRpcClient<S> {
    channel: Mutex<Channel<S>>,
    next_id: AtomicU64,
    timeout: Duration,
}

/// The stream plus the read state that must survive a cancelled request.
struct Channel<S> {
    reader: BufReader<S>,
    /// Bytes of a response line read before a timeout cut the read short.
    partial: Vec<u8>,
    /// Set while a request frame is being written; still set afterwards
    /// only if the write was cut short.
    torn_write: bool,
}

impl<S> JsonRpcClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps a connected stream.
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self {
            channel: Mutex::new(Channel {
                reader: BufReader::new(stream),
                partial: Vec::new(),
                torn_write: false,
            }),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    /// Sends one request and waits for its response.
    ///
    /// The outer error is a channel failure; the inner one an exception
    /// raised by the service.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Result<Value, RpcErrorBody>, ActionError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest {
            id,
            method: method.to_string(),
            params,
        };
        let mut frame = serde_json::to_string(&request)
            .map_err(|e| ActionError::Connection(format!("cannot encode request: {e}")))?;
        frame.push('\n');

        let io_error =
            |e: std::io::Error| ActionError::Connection(format!("request '{method}' failed: {e}"));

        let mut channel = self.channel.lock().await;
        if channel.torn_write {
            return Err(ActionError::Connection(
                "channel unusable after an interrupted request".to_string(),
            ));
        }

        let exchange = async {
            let Channel {
                reader,
                partial,
                torn_write,
            } = &mut *channel;

            *torn_write = true;
            reader.write_all(frame.as_bytes()).await.map_err(io_error)?;
            reader.flush().await.map_err(io_error)?;
            *torn_write = false;

            loop {
                if reader.read_until(b'\n', partial).await.map_err(io_error)? == 0 {
                    return Err(ActionError::Connection(
                        "service closed the connection".to_string(),
                    ));
                }
                let line = std::mem::take(partial);
                let response: RpcResponse = serde_json::from_slice(&line)
                    .map_err(|e| ActionError::Connection(format!("malformed response: {e}")))?;
                if response.id < id {
                    debug!(stale = response.id, id, "discarding response to an abandoned request");
                    continue;
                }
                if response.id != id {
                    return Err(ActionError::Connection(format!(
                        "response id {} does not match request id {id}",
                        response.id
                    )));
                }
                return Ok(response);
            }
        };

        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                ActionError::Connection(format!(
                    "request '{method}' timed out after {:?}",
                    self.timeout
                ))
            })??;
        debug!(method, id, "service request completed");

        match response.error {
            Some(error) => Ok(Err(error)),
            None => Ok(Ok(response.result.unwrap_or(Value::Null))),
        }
    }
}

#[async_trait]
impl<S> RemoteExecutionService for JsonRpcClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn upload_module(&self, local_path: &Path, module_name: &str) -> Result<(), ActionError> {
        let source = tokio::fs::read(local_path).await?;
        let filename = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{module_name}.py"));
        let params = json!({
            "module_name": module_name,
            "filename": filename,
            "content_b64": BASE64.encode(source),
        });

        self.call("upload_module", params)
            .await?
            .map(|_| ())
            .map_err(|e| ActionError::RemoteCall {
                module: module_name.to_string(),
                function: "upload_module".to_string(),
                kind: e.kind,
                message: e.message,
            })
    }

    async fn exec_action(
        &self,
        module: &str,
        function: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, ActionError> {
        let params = json!({
            "module": module,
            "function": function,
            "args": args,
            "kwargs": kwargs,
        });

        self.call("exec_action", params)
            .await?
            .map_err(|e| ActionError::RemoteCall {
                module: module.to_string(),
                function: function.to_string(),
                kind: e.kind,
                message: e.message,
            })
    }
}

impl<S> std::fmt::Debug for JsonRpcClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::DuplexStream;

    /// Answers every request with `respond(request)` until the stream closes.
    fn spawn_server<F>(server: DuplexStream, respond: F) -> tokio::task::JoinHandle<Vec<RpcRequest>>
    where
        F: Fn(&RpcRequest) -> RpcResponse + Send + 'static,
    {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut reader = BufReader::new(server);
            let mut line = String::new();
            while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
                let request: RpcRequest = serde_json::from_str(line.trim()).unwrap();
                let mut frame = serde_json::to_string(&respond(&request)).unwrap();
                frame.push('\n');
                reader.get_mut().write_all(frame.as_bytes()).await.unwrap();
                seen.push(request);
                line.clear();
            }
            seen
        })
    }

    #[tokio::test]
    async fn test_exec_action_round_trip() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let server = spawn_server(server_end, |req| RpcResponse {
            id: req.id,
            result: Some(json!(req.params["args"][0].as_i64().unwrap_or(0) * 2)),
            error: None,
        });

        let client = JsonRpcClient::new(client_end, Duration::from_secs(5));
        let value = client
            .exec_action("math", "double", vec![json!(21)], Map::new())
            .await
            .unwrap();
        assert_eq!(value, json!(42));

        drop(client);
        let seen = server.await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "exec_action");
        assert_eq!(seen[0].params["function"], "double");
    }

    #[tokio::test]
    async fn test_remote_exception_maps_to_remote_call() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let _server = spawn_server(server_end, |req| RpcResponse {
            id: req.id,
            result: None,
            error: Some(RpcErrorBody {
                kind: "ValueError".to_string(),
                message: "Module 'math' is not loaded.".to_string(),
            }),
        });

        let client = JsonRpcClient::new(client_end, Duration::from_secs(5));
        let err = client
            .exec_action("math", "double", Vec::new(), Map::new())
            .await
            .unwrap_err();
        match err {
            ActionError::RemoteCall { module, kind, .. } => {
                assert_eq!(module, "math");
                assert_eq!(kind, "ValueError");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_module_sends_base64_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "def run():\n    return 1\n").unwrap();

        let (client_end, server_end) = tokio::io::duplex(4096);
        let server = spawn_server(server_end, |req| RpcResponse {
            id: req.id,
            result: None,
            error: None,
        });

        let client = JsonRpcClient::new(client_end, Duration::from_secs(5));
        client.upload_module(file.path(), "actions").await.unwrap();
        drop(client);

        let seen = server.await.unwrap();
        let encoded = seen[0].params["content_b64"].as_str().unwrap();
        assert_eq!(BASE64.decode(encoded).unwrap(), b"def run():\n    return 1\n");
        assert_eq!(seen[0].params["module_name"], "actions");
    }

    #[tokio::test]
    async fn test_closed_stream_is_connection_error() {
        let (client_end, server_end) = tokio::io::duplex(64);
        drop(server_end);

        let client = JsonRpcClient::new(client_end, Duration::from_secs(5));
        let err = client
            .exec_action("m", "f", Vec::new(), Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "connection");
    }

    #[tokio::test]
    async fn test_late_reply_does_not_desync_later_requests() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            let mut reader = BufReader::new(server_end);
            let mut line = String::new();
            while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
                let request: RpcRequest = serde_json::from_str(line.trim()).unwrap();
                if request.id == 1 {
                    tokio::time::sleep(Duration::from_millis(400)).await;
                }
                let response = RpcResponse {
                    id: request.id,
                    result: Some(json!(request.id)),
                    error: None,
                };
                let mut frame = serde_json::to_string(&response).unwrap();
                frame.push('\n');
                reader.get_mut().write_all(frame.as_bytes()).await.unwrap();
                line.clear();
            }
        });

        let client = JsonRpcClient::new(client_end, Duration::from_millis(250));
        let first = client.call("ping", Value::Null).await.unwrap_err();
        assert!(first.to_string().contains("timed out after 250ms"), "{first}");

        assert_eq!(client.call("ping", Value::Null).await.unwrap(), Ok(json!(2)));
        assert_eq!(client.call("ping", Value::Null).await.unwrap(), Ok(json!(3)));

        drop(client);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let (client_end, _server_end) = tokio::io::duplex(4096);
        let client = JsonRpcClient::new(client_end, Duration::from_millis(50));
        let err = client
            .exec_action("m", "f", Vec::new(), Map::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
