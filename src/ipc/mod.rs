//! Editor-host IPC transport.
//!
//! A per-workspace local stream socket carrying newline-delimited JSON, one
//! request per connection. The socket path is derived deterministically
//! from the workspace root, so the coordinator and the editor extension
//! find each other without a discovery protocol.
//!
//! # Submodules
//!
//! - [`path`] - Socket path derivation (workspace hash, data directory)
//! - [`protocol`] - Request/response wire types
//! - [`client`] - One-shot client, liveness probe, discovery with stale reaping
//! - [`server`] - The editor-host half (bound socket, request handling)

pub mod client;
pub mod path;
pub mod protocol;
#[cfg(unix)]
pub mod server;

pub use client::{discover, probe, request_with_retry, send, IpcError};
pub use path::{data_dir, socket_path, workspace_hash};
pub use protocol::{IpcRequest, IpcRequestBody, IpcResponse, IpcResponseBody};
#[cfg(unix)]
pub use server::IpcServer;
