//! Stateless IPC client: one connection per request.
//!
//! Each request connects, writes one JSON line, reads one JSON line, and
//! closes. Discovery first tries the workspace-specific path, then sweeps
//! the data directory, unlinking any socket file whose owner is gone.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

use crate::ipc::path::{data_dir, is_socket_file_name, socket_path_in};
use crate::ipc::protocol::{IpcRequest, IpcRequestBody, IpcResponse};

/// Default timeout for a full request round trip.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the liveness probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors surfaced by IPC requests.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The socket is missing or refused the connection.
    #[error("could not connect to editor-host socket: {0}")]
    Connect(#[source] std::io::Error),

    /// The round trip did not finish in time.
    #[error("IPC request timed out after {0:?}")]
    Timeout(Duration),

    /// The peer closed before a full response line arrived.
    #[error("editor-host closed the connection before responding")]
    ClosedEarly,

    /// The response line was not valid JSON for the wire format.
    #[error("malformed IPC response: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Transport failure mid-request.
    #[error("IPC transport error: {0}")]
    Io(#[source] std::io::Error),

    /// IPC is not supported on this platform build.
    #[error("IPC transport is not available on this platform")]
    Unsupported,
}

/// Send one request and wait for its response.
///
/// The whole round trip (connect, write, read one line) is bounded by
/// `timeout`; on expiry the socket is dropped and [`IpcError::Timeout`]
/// returned.
pub async fn send(
    socket: &Path,
    request: &IpcRequest,
    timeout: Duration,
) -> Result<IpcResponse, IpcError> {
    match tokio::time::timeout(timeout, send_inner(socket, request)).await {
        Ok(result) => result,
        Err(_) => Err(IpcError::Timeout(timeout)),
    }
}

#[cfg(unix)]
async fn send_inner(socket: &Path, request: &IpcRequest) -> Result<IpcResponse, IpcError> {
    use tokio::net::UnixStream;

    let mut stream = UnixStream::connect(socket)
        .await
        .map_err(IpcError::Connect)?;

    let mut line = serde_json::to_string(request).map_err(IpcError::Malformed)?;
    line.push('\n');
    stream
        .write_all(line.as_bytes())
        .await
        .map_err(IpcError::Io)?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    let read = reader
        .read_line(&mut response_line)
        .await
        .map_err(IpcError::Io)?;
    if read == 0 || !response_line.ends_with('\n') {
        return Err(IpcError::ClosedEarly);
    }

    serde_json::from_str(response_line.trim_end()).map_err(IpcError::Malformed)
}

#[cfg(not(unix))]
async fn send_inner(_socket: &Path, _request: &IpcRequest) -> Result<IpcResponse, IpcError> {
    Err(IpcError::Unsupported)
}

/// Send a request built from `body`, retrying exactly once on failure.
pub async fn request_with_retry(
    socket: &Path,
    body: IpcRequestBody,
    timeout: Duration,
) -> Result<IpcResponse, IpcError> {
    let request = IpcRequest::new(body);
    match send(socket, &request, timeout).await {
        Ok(response) => Ok(response),
        Err(first) => {
            debug!(socket = %socket.display(), "IPC request failed, retrying once: {}", first);
            send(socket, &request, timeout).await
        }
    }
}

/// Liveness probe: a bounded `ping` answered by a well-formed `ok`.
pub async fn probe(socket: &Path) -> bool {
    let request = IpcRequest::new(IpcRequestBody::Ping);
    matches!(
        send(socket, &request, PROBE_TIMEOUT).await,
        Ok(response) if response.is_ok()
    )
}

/// Find a healthy editor-host socket.
///
/// The workspace-specific path is probed first; failing that, every socket
/// file in the data directory is probed in turn, with stale files unlinked
/// along the way. Returns the first healthy path, or `None`.
pub async fn discover(workspace: Option<&Path>) -> Option<PathBuf> {
    discover_in(&data_dir(), workspace).await
}

/// [`discover`] against an explicit data directory.
pub async fn discover_in(dir: &Path, workspace: Option<&Path>) -> Option<PathBuf> {
    #[cfg(not(unix))]
    {
        let _ = (dir, workspace);
        return None;
    }

    #[cfg(unix)]
    {
        let workspace_socket = workspace.map(|ws| socket_path_in(dir, ws));
        if let Some(ref candidate) = workspace_socket {
            if probe(candidate).await {
                return Some(candidate.clone());
            }
            if candidate.exists() {
                trace!(socket = %candidate.display(), "reaping stale IPC socket");
                let _ = std::fs::remove_file(candidate);
            }
        }

        let entries = std::fs::read_dir(dir).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_socket_file_name(name) {
                continue;
            }
            let candidate = entry.path();
            if Some(&candidate) == workspace_socket.as_ref() {
                continue;
            }

            if probe(&candidate).await {
                return Some(candidate);
            }

            trace!(socket = %candidate.display(), "reaping stale IPC socket");
            let _ = std::fs::remove_file(&candidate);
        }
        None
    }
}
