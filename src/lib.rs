//! # Browser Coordinator
//!
//! A long-running coordinator that owns the lifecycle of a locally-launched
//! browser exposing the Chrome DevTools Protocol and publishes a *stable*
//! proxy port for downstream automation clients, regardless of which
//! concrete browser is currently behind it.
//!
//! ## Features
//!
//! - **Stable front port**: a byte-transparent TCP reverse proxy whose
//!   listen port never changes while the backend browser comes, goes, and
//!   gets swapped.
//! - **Lazy launch**: the first incoming connection triggers exactly one
//!   browser spawn, shared by every concurrent arrival.
//! - **Browser lifecycle**: detection of installed browsers, isolated
//!   per-launch profiles, stderr readiness parsing, two-phase termination.
//! - **Editor integration**: a per-workspace IPC socket lets an editor
//!   extension offer its embedded browser view instead of a spawn.
//! - **Page operations**: navigation, DOM extraction, element picking,
//!   screenshots, and in-page fetch over short-lived CDP sessions.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use browser_coordinator::config::CoordinatorSettings;
//! use browser_coordinator::controller::Coordinator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = CoordinatorSettings::default();
//!     let coordinator = Coordinator::start(settings).await?;
//!
//!     println!("proxy listening on {}", coordinator.proxy_port());
//!
//!     tokio::signal::ctrl_c().await?;
//!     coordinator.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`browser`]: installed-browser detection and process lifecycle
//! - [`proxy`]: the stable-port reverse proxy with single-flight lazy launch
//! - [`rendezvous`]: the filesystem record sibling processes discover us by
//! - [`ipc`]: the per-workspace editor-host transport
//! - [`editor`]: editor environment detection
//! - [`session`]: short-lived CDP sessions for page operations
//! - [`controller`]: the component that wires everything together
//! - [`wrap`]: wrap-style invocation of downstream programs
//! - [`config`]: settings loading and precedence

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

// ============================================================================
// Module Exports
// ============================================================================

/// Installed-browser detection and process lifecycle management.
pub mod browser;

/// Configuration loading and precedence.
pub mod config;

/// The coordinator controller and its control operations.
pub mod controller;

/// Editor-host environment detection.
pub mod editor;

/// Per-workspace editor-host IPC transport.
pub mod ipc;

/// Stable-port reverse proxy with single-flight lazy launch.
pub mod proxy;

/// Filesystem rendezvous state.
pub mod rendezvous;

/// Short-lived CDP sessions for page operations.
pub mod session;

/// Wrap-style invocation of downstream programs.
pub mod wrap;

// ============================================================================
// Re-exports for Convenience
// ============================================================================

pub use browser::{BrowserDescriptor, BrowserInstance, BrowserKind, Engine, LaunchError, LaunchOptions};
pub use config::{CliArgs, ConfigError, CoordinatorSettings};
pub use controller::{Coordinator, EditorTier, StatusReport};
pub use editor::{EditorState, VsCodeEnvironment};
pub use ipc::{IpcError, IpcRequest, IpcRequestBody, IpcResponse, IpcResponseBody};
pub use proxy::{DevtoolsProxy, ProxyError};
pub use rendezvous::RendezvousRecord;
pub use session::{
    CapturedScreenshot, ClipRegion, DomElement, FetchRequest, PageRunner, ScreenshotFormat,
    ScreenshotOptions, SessionError,
};

/// Prelude module for convenient imports.
///
/// ```rust
/// use browser_coordinator::prelude::*;
/// ```
pub mod prelude {
    pub use crate::browser::{BrowserKind, LaunchOptions};
    pub use crate::config::CoordinatorSettings;
    pub use crate::controller::Coordinator;
    pub use crate::proxy::DevtoolsProxy;
    pub use crate::session::{FetchRequest, ScreenshotOptions};
    pub use crate::{NAME, VERSION};
}
