//! Editor-host socket server.
//!
//! This is the half owned by the editor extension: it binds the
//! per-workspace socket, answers one request per connection, and keeps the
//! published [`EditorState`] current. The coordinator side only ever acts
//! as a client, but the server lives here so both halves share one wire
//! format (and so the client can be exercised against the real thing in
//! tests).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::editor::EditorState;
use crate::ipc::client::IpcError;
use crate::ipc::protocol::{IpcRequestBody, IpcResponse, IpcResponseBody};

/// A bound editor-host IPC endpoint.
pub struct IpcServer {
    path: PathBuf,
    state: Arc<RwLock<EditorState>>,
    accept_task: JoinHandle<()>,
}

impl IpcServer {
    /// Bind the socket at `path`, replacing any leftover file from a
    /// previous owner, and start answering requests.
    pub async fn bind(path: PathBuf, initial_state: EditorState) -> Result<Self, IpcError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(IpcError::Io)?;
        }
        if path.exists() {
            debug!(socket = %path.display(), "removing leftover socket file");
            std::fs::remove_file(&path).map_err(IpcError::Io)?;
        }

        let listener = UnixListener::bind(&path).map_err(IpcError::Connect)?;
        let state = Arc::new(RwLock::new(initial_state));

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let conn_state = Arc::clone(&accept_state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, conn_state).await {
                                debug!("IPC connection failed: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("IPC accept failed: {}", e);
                        break;
                    }
                }
            }
        });

        debug!(socket = %path.display(), "editor-host IPC server bound");
        Ok(Self {
            path,
            state,
            accept_task,
        })
    }

    /// The bound socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared handle to the published state.
    pub fn state(&self) -> Arc<RwLock<EditorState>> {
        Arc::clone(&self.state)
    }

    /// Stop accepting and remove the socket file.
    pub async fn close(self) {
        self.accept_task.abort();
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = std::fs::remove_file(&self.path);
    }
}

/// One request, one response, then close.
async fn handle_connection(
    stream: UnixStream,
    state: Arc<RwLock<EditorState>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
        return Ok(());
    }

    let response = respond(line.trim_end(), &state).await;
    let mut stream = reader.into_inner();
    let mut encoded = serde_json::to_string(&response).unwrap_or_else(|_| {
        r#"{"id":"","type":"error","payload":{"message":"response encoding failed"}}"#.to_string()
    });
    encoded.push('\n');
    stream.write_all(encoded.as_bytes()).await?;
    stream.shutdown().await
}

/// Decode a request line and produce its response.
///
/// A line that is not JSON, or names an unknown request type, yields an
/// error response carrying whatever id could be recovered.
async fn respond(line: &str, state: &RwLock<EditorState>) -> IpcResponse {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => return IpcResponse::error("", format!("invalid request: {}", e)),
    };

    let id = value
        .get("id")
        .and_then(|id| id.as_str())
        .unwrap_or_default()
        .to_string();

    let request: crate::ipc::protocol::IpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(_) => return IpcResponse::error(id, "unsupported request type"),
    };
    let id = request.id;

    match request.body {
        IpcRequestBody::Ping => IpcResponse::ok(id),
        IpcRequestBody::GetState => {
            let snapshot = state.read().await.clone();
            IpcResponse {
                id,
                body: IpcResponseBody::State(snapshot),
            }
        }
        IpcRequestBody::Navigate { url } => {
            state.write().await.active_browser_url = Some(url);
            IpcResponse::ok(id)
        }
        IpcRequestBody::StartElementSelect | IpcRequestBody::CancelElementSelect => {
            IpcResponse::ok(id)
        }
    }
}
