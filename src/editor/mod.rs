//! Editor-host environment detection.
//!
//! The editor extension, when present, owns a per-workspace IPC socket and
//! may advertise a CDP port for its embedded browser view. Detection runs
//! once at startup and is refreshed opportunistically whenever an operation
//! that depends on the editor fails.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::ipc::client;
use crate::ipc::protocol::{IpcRequestBody, IpcResponseBody};

/// State published by the editor extension, read-only from our side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorState {
    /// CDP port of the editor's embedded browser view, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdp_port: Option<u16>,

    /// Version string of the editor extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_version: Option<String>,

    /// Workspace the extension is serving.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<String>,

    /// URL currently displayed in the embedded browser view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_browser_url: Option<String>,
}

/// What the coordinator knows about the surrounding editor.
#[derive(Debug, Clone, Default)]
pub struct VsCodeEnvironment {
    /// A live editor-host IPC endpoint was found.
    pub detected: bool,

    /// CDP port advertised by the editor, if any.
    pub cdp_port: Option<u16>,

    /// Path of the healthy IPC socket.
    pub ipc_socket: Option<PathBuf>,

    /// Extension version reported over IPC.
    pub extension_version: Option<String>,

    /// URL the editor's browser view currently shows.
    pub active_browser_url: Option<String>,
}

impl VsCodeEnvironment {
    /// An environment with detection disabled or nothing found.
    pub fn undetected() -> Self {
        Self::default()
    }

    /// Probe for an editor-host endpoint and pull its state.
    pub async fn detect(workspace: Option<&Path>) -> Self {
        let socket = match client::discover(workspace).await {
            Some(path) => path,
            None => {
                debug!("no editor-host IPC endpoint found");
                return Self::undetected();
            }
        };

        let state = fetch_state(&socket).await;
        match state {
            Some(state) => {
                debug!(
                    socket = %socket.display(),
                    cdp_port = ?state.cdp_port,
                    "editor-host detected"
                );
                Self {
                    detected: true,
                    cdp_port: state.cdp_port,
                    ipc_socket: Some(socket),
                    extension_version: state.extension_version,
                    active_browser_url: state.active_browser_url,
                }
            }
            // The socket answered the probe but not get_state; treat it as
            // present without a browser view.
            None => Self {
                detected: true,
                cdp_port: None,
                ipc_socket: Some(socket),
                extension_version: None,
                active_browser_url: None,
            },
        }
    }

    /// Whether IPC requests can be attempted at all.
    pub fn ipc_live(&self) -> bool {
        self.detected && self.ipc_socket.is_some()
    }
}

/// One `get_state` round trip, with the standard single retry.
pub async fn fetch_state(socket: &Path) -> Option<EditorState> {
    let response = client::request_with_retry(
        socket,
        IpcRequestBody::GetState,
        client::DEFAULT_SEND_TIMEOUT,
    )
    .await
    .ok()?;

    match response.body {
        IpcResponseBody::State(state) => Some(state),
        _ => None,
    }
}
