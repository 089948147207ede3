//! Coordinator controller: wires detection, lifecycle, proxy, rendezvous,
//! and page operations together.
//!
//! Startup ordering: detect the editor environment (unless disabled), bind
//! the proxy, register the lazy-launch callback, adopt the editor's CDP
//! port as the initial backend when advertised, publish the rendezvous
//! record. Shutdown reverses through browser → proxy → rendezvous, so a
//! reconnecting client can never reach a zombie backend.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::browser::{detector, launcher};
use crate::browser::{BrowserInstance, BrowserKind, Engine, LaunchOptions};
use crate::config::CoordinatorSettings;
use crate::editor::VsCodeEnvironment;
use crate::ipc::client as ipc_client;
use crate::ipc::protocol::IpcRequestBody;
use crate::rendezvous::{self, RendezvousRecord};
use crate::session::screenshot::ScreenshotOptions;
use crate::session::{scripts, CapturedScreenshot, DomElement, FetchRequest, PageRunner};
use crate::proxy::DevtoolsProxy;

/// Full-document DOM output is capped at this many characters.
const DOM_TRUNCATE_CHARS: usize = 100_000;

/// Options remembered from the last explicit launch, replayed by restart.
#[derive(Debug, Clone, Default)]
struct LaunchMemory {
    kind: Option<BrowserKind>,
    headless: Option<bool>,
}

/// How much of the editor integration is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorTier {
    /// No editor-host endpoint found.
    None,

    /// IPC endpoint alive, no embedded browser advertised.
    IpcOnly,

    /// IPC endpoint alive and advertising a CDP port.
    IpcWithBrowser,
}

impl std::fmt::Display for EditorTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditorTier::None => write!(f, "not detected"),
            EditorTier::IpcOnly => write!(f, "ipc"),
            EditorTier::IpcWithBrowser => write!(f, "ipc+browser"),
        }
    }
}

/// Snapshot of coordinator state for the status operation.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub browser_running: bool,
    pub engine: Option<Engine>,
    pub kind: Option<BrowserKind>,
    pub internal_port: Option<u16>,
    pub proxy_port: u16,
    pub editor: EditorTier,
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.browser_running {
            writeln!(
                f,
                "browser: running ({}, internal port {})",
                self.kind.map(|k| k.to_string()).unwrap_or_default(),
                self.internal_port.unwrap_or_default()
            )?;
        } else {
            writeln!(f, "browser: stopped")?;
        }
        if let Some(engine) = self.engine {
            writeln!(f, "engine: {}", engine)?;
        }
        writeln!(f, "proxy port: {}", self.proxy_port)?;
        write!(f, "editor: {}", self.editor)
    }
}

/// The long-running coordinator.
pub struct Coordinator {
    settings: CoordinatorSettings,
    proxy: DevtoolsProxy,
    browser: Mutex<Option<BrowserInstance>>,
    editor: RwLock<VsCodeEnvironment>,
    launch_memory: parking_lot::Mutex<LaunchMemory>,
}

impl Coordinator {
    /// Run the startup sequence and return the live coordinator.
    ///
    /// Only proxy-bind failure is fatal; a missing editor or browser just
    /// narrows what the coordinator can do.
    pub async fn start(settings: CoordinatorSettings) -> Result<Arc<Self>> {
        let editor = if settings.detect_editor {
            VsCodeEnvironment::detect(settings.workspace.as_deref()).await
        } else {
            VsCodeEnvironment::undetected()
        };

        let proxy = DevtoolsProxy::listen(settings.proxy_port)
            .await
            .context("could not bind the devtools proxy")?;

        let editor_cdp = editor.cdp_port;
        let coordinator = Arc::new(Self {
            settings,
            proxy,
            browser: Mutex::new(None),
            editor: RwLock::new(editor),
            launch_memory: parking_lot::Mutex::new(LaunchMemory::default()),
        });

        let weak: Weak<Coordinator> = Arc::downgrade(&coordinator);
        coordinator.proxy.on_lazy_launch(move || {
            let weak = weak.clone();
            async move {
                let coordinator = weak
                    .upgrade()
                    .ok_or_else(|| anyhow!("coordinator is shutting down"))?;
                coordinator.lazy_backend().await
            }
        });

        if let Some(port) = editor_cdp {
            info!(port, "adopting editor browser as initial backend");
            coordinator.proxy.set_backend(port);
        }

        rendezvous::write_at(
            &coordinator.rendezvous_path(),
            &RendezvousRecord {
                port: coordinator.proxy.port(),
                pid: std::process::id() as i32,
            },
        );

        info!(proxy_port = coordinator.proxy.port(), "coordinator started");
        Ok(coordinator)
    }

    /// The stable proxy port downstream clients should use.
    pub fn proxy_port(&self) -> u16 {
        self.proxy.port()
    }

    /// Where this coordinator publishes its rendezvous record.
    fn rendezvous_path(&self) -> PathBuf {
        self.settings
            .rendezvous_path
            .clone()
            .unwrap_or_else(rendezvous::state_path)
    }

    /// Lazy-launch body: prefer the editor's browser, otherwise spawn one.
    async fn lazy_backend(self: Arc<Self>) -> Result<u16> {
        if let Some(port) = self.refresh_editor().await.cdp_port {
            info!(port, "lazy launch satisfied by editor browser");
            return Ok(port);
        }

        let memory = self.launch_memory.lock().clone();
        let instance = self
            .spawn_browser(memory.kind, memory.headless)
            .await
            .context("lazy browser launch failed")?;
        let port = instance.debug_port;
        *self.browser.lock().await = Some(instance);
        Ok(port)
    }

    /// Pick and launch a browser with the coordinator's defaults applied.
    async fn spawn_browser(
        &self,
        kind: Option<BrowserKind>,
        headless: Option<bool>,
    ) -> Result<BrowserInstance> {
        let installed = detector::enumerate();
        let descriptor = detector::pick(kind, &installed)
            .ok_or(launcher::LaunchError::NoBrowser)?;

        let port = launcher::alloc_debug_port().context("no free port for debugging")?;
        let options = LaunchOptions::default()
            .headless(headless.unwrap_or(self.settings.headless))
            .readiness_timeout(Duration::from_secs(self.settings.readiness_timeout_secs));

        let instance = launcher::launch(&descriptor, port, &options).await?;
        Ok(instance)
    }

    /// Re-probe the editor environment and cache the result.
    async fn refresh_editor(&self) -> VsCodeEnvironment {
        if !self.settings.detect_editor {
            return VsCodeEnvironment::undetected();
        }
        let refreshed = VsCodeEnvironment::detect(self.settings.workspace.as_deref()).await;
        *self.editor.write().await = refreshed.clone();
        refreshed
    }

    /// Resolve a live backend port, launching lazily when none is set.
    async fn backend_port(&self) -> Result<u16> {
        Ok(self.proxy.ensure_backend().await?)
    }

    // ------------------------------------------------------------------
    // Control operations
    // ------------------------------------------------------------------

    /// Human-readable lines describing every usable browser.
    pub async fn list_browsers(&self) -> Vec<String> {
        let mut lines = Vec::new();

        let editor = self.editor.read().await;
        if editor.ipc_live() {
            let version = editor
                .extension_version
                .as_deref()
                .unwrap_or("unknown version");
            lines.push(format!("editor browser (extension {})", version));
        }
        drop(editor);

        for descriptor in detector::enumerate() {
            lines.push(format!(
                "{} ({}) - {}",
                descriptor.name,
                descriptor.kind,
                descriptor.path.display()
            ));
        }

        if lines.is_empty() {
            lines.push("no supported browsers found".to_string());
        }
        lines
    }

    /// Current coordinator state.
    pub async fn status(&self) -> StatusReport {
        let browser = self.browser.lock().await;
        let editor = self.editor.read().await;

        let editor_tier = if !editor.ipc_live() {
            EditorTier::None
        } else if editor.cdp_port.is_some() {
            EditorTier::IpcWithBrowser
        } else {
            EditorTier::IpcOnly
        };

        StatusReport {
            browser_running: browser.is_some(),
            engine: browser.as_ref().map(|b| b.engine),
            kind: browser.as_ref().map(|b| b.descriptor.kind),
            internal_port: browser.as_ref().map(|b| b.debug_port),
            proxy_port: self.proxy.port(),
            editor: editor_tier,
        }
    }

    /// Launch a browser (replacing any running instance) and point the
    /// proxy at it.
    ///
    /// Without an explicit kind, a live editor browser takes precedence and
    /// nothing is spawned. An explicit kind always wins over the editor.
    pub async fn launch_browser(
        &self,
        kind: Option<BrowserKind>,
        headless: Option<bool>,
    ) -> Result<String> {
        if kind.is_none() {
            let editor = self.refresh_editor().await;
            if editor.ipc_live() {
                return Ok(
                    "using the editor's browser; pass an explicit kind to launch a standalone one"
                        .to_string(),
                );
            }
        }

        if let Some(previous) = self.browser.lock().await.take() {
            launcher::stop(previous).await;
        }

        let instance = self.spawn_browser(kind, headless).await?;
        let port = instance.debug_port;
        let name = instance.descriptor.name.clone();
        *self.browser.lock().await = Some(instance);

        *self.launch_memory.lock() = LaunchMemory { kind, headless };

        // Existing pairs still point at the old backend; drop them so
        // downstream clients reconnect to the stable port and land on the
        // new one.
        self.proxy.set_backend(port);
        self.proxy.close_connections();

        Ok(format!(
            "{} running (internal port {}, proxy port {})",
            name,
            port,
            self.proxy.port()
        ))
    }

    /// Stop the managed browser, if any.
    pub async fn stop_browser(&self) -> Result<String> {
        match self.browser.lock().await.take() {
            Some(instance) => {
                launcher::stop(instance).await;
                self.proxy.clear_backend();
                self.proxy.close_connections();
                Ok("browser stopped".to_string())
            }
            None => Ok("no browser is running".to_string()),
        }
    }

    /// Stop and relaunch with the remembered options. The proxy port is
    /// invariant across this operation.
    pub async fn restart_browser(&self) -> Result<String> {
        if let Some(previous) = self.browser.lock().await.take() {
            launcher::stop(previous).await;
        }

        let memory = self.launch_memory.lock().clone();
        let instance = self.spawn_browser(memory.kind, memory.headless).await?;
        let port = instance.debug_port;
        *self.browser.lock().await = Some(instance);

        self.proxy.set_backend(port);
        self.proxy.close_connections();

        Ok(format!(
            "browser restarted (internal port {}, proxy port {})",
            port,
            self.proxy.port()
        ))
    }

    /// Navigate: the editor's browser view when IPC is live, otherwise the
    /// managed browser through a CDP session.
    pub async fn navigate(&self, url: &str) -> Result<String> {
        let editor = self.editor.read().await.clone();
        if let Some(socket) = editor.ipc_socket.as_deref().filter(|_| editor.detected) {
            let response = ipc_client::request_with_retry(
                socket,
                IpcRequestBody::Navigate {
                    url: url.to_string(),
                },
                Duration::from_secs(self.settings.ipc_timeout_secs),
            )
            .await;

            match response {
                Ok(response) if response.is_ok() => {
                    self.editor.write().await.active_browser_url = Some(url.to_string());
                    return Ok(format!("navigated editor browser to {}", url));
                }
                Ok(response) => {
                    debug!("editor navigate declined: {:?}", response.body);
                }
                Err(e) => {
                    warn!("editor navigate failed, falling back to CDP: {}", e);
                    self.refresh_editor().await;
                }
            }
        }

        let port = self.backend_port().await?;
        let runner = PageRunner::connect(port).await?;
        let result = runner
            .navigate(url, Duration::from_secs(self.settings.eval_timeout_secs))
            .await;
        runner.close().await;
        result?;
        Ok(format!("navigated to {}", url))
    }

    /// Interactive element selection, bounded by `timeout`.
    pub async fn select_element(&self, timeout: Duration) -> Result<DomElement> {
        let editor = self.editor.read().await.clone();
        if let Some(socket) = editor.ipc_socket.as_deref() {
            // Best-effort notification; selection works without the editor.
            let _ = ipc_client::request_with_retry(
                socket,
                IpcRequestBody::StartElementSelect,
                Duration::from_secs(self.settings.ipc_timeout_secs),
            )
            .await;
        }

        let port = self.backend_port().await?;
        let runner = PageRunner::connect(port).await?;
        let picked = runner
            .eval(&scripts::element_picker(timeout.as_millis() as u64), timeout)
            .await;
        runner.close().await;

        if let Some(socket) = editor.ipc_socket.as_deref() {
            let _ = ipc_client::request_with_retry(
                socket,
                IpcRequestBody::CancelElementSelect,
                Duration::from_secs(self.settings.ipc_timeout_secs),
            )
            .await;
        }

        let value = picked?;
        let encoded = value
            .as_str()
            .ok_or_else(|| anyhow!("element picker returned no selection"))?;
        let element: DomElement =
            serde_json::from_str(encoded).context("could not parse the selected element")?;
        Ok(element)
    }

    /// Render the document (or a selected element) as HTML.
    ///
    /// Full-document output is truncated to 100 000 characters.
    pub async fn get_dom(&self, selector: Option<&str>, depth: Option<u32>) -> Result<String> {
        let port = self.backend_port().await?;
        let runner = PageRunner::connect(port).await?;
        let result = runner
            .eval(
                &scripts::dom_snapshot(selector, depth),
                Duration::from_secs(self.settings.eval_timeout_secs),
            )
            .await;
        runner.close().await;

        let value = result?;
        let html = match value.as_str() {
            Some(html) => html.to_string(),
            None if selector.is_some() => {
                anyhow::bail!("no element matches selector {:?}", selector.unwrap_or_default())
            }
            None => anyhow::bail!("page returned no document"),
        };

        if selector.is_none() && html.len() > DOM_TRUNCATE_CHARS {
            let mut truncated: String = html.chars().take(DOM_TRUNCATE_CHARS).collect();
            truncated.push_str("\n<!-- truncated -->");
            return Ok(truncated);
        }
        Ok(html)
    }

    /// Capture a screenshot per the documented clipping precedence.
    pub async fn screenshot(&self, mut options: ScreenshotOptions) -> Result<CapturedScreenshot> {
        if options.output_dir.is_none() {
            options.output_dir = self.settings.screenshot_dir.clone();
        }
        let port = self.backend_port().await?;
        let runner = PageRunner::connect(port).await?;
        let result = runner.capture(&options).await;
        runner.close().await;
        Ok(result?)
    }

    /// In-page HTTP fetch with the origin-preservation check.
    pub async fn fetch(&self, request: FetchRequest) -> Result<String> {
        let port = self.backend_port().await?;
        let runner = PageRunner::connect(port).await?;
        let result = runner.fetch(&request).await;
        runner.close().await;
        Ok(result?)
    }

    /// Ordered shutdown: browser, proxy, rendezvous.
    pub async fn shutdown(&self) {
        info!("coordinator shutting down");
        if let Some(instance) = self.browser.lock().await.take() {
            launcher::stop(instance).await;
        }
        self.proxy.close();
        rendezvous::clear_at(&self.rendezvous_path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorSettings;

    fn test_settings(dir: &std::path::Path) -> CoordinatorSettings {
        CoordinatorSettings {
            detect_editor: false,
            rendezvous_path: Some(dir.join("state.json")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_startup_publishes_rendezvous_and_stable_port() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        let coordinator = Coordinator::start(test_settings(dir.path())).await.unwrap();
        let port = coordinator.proxy_port();
        assert!(port > 0);

        let record =
            rendezvous::read_at(&state_path).expect("rendezvous record written at startup");
        assert_eq!(record.port, port);
        assert_eq!(record.pid, std::process::id() as i32);

        coordinator.shutdown().await;
        assert!(rendezvous::read_at(&state_path).is_none());
    }

    #[tokio::test]
    async fn test_status_reports_stopped_browser() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::start(test_settings(dir.path())).await.unwrap();
        let status = coordinator.status().await;

        assert!(!status.browser_running);
        assert_eq!(status.editor, EditorTier::None);
        assert_eq!(status.proxy_port, coordinator.proxy_port());
        assert!(status.to_string().contains("browser: stopped"));

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_browser_without_instance_is_benign() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::start(test_settings(dir.path())).await.unwrap();
        let message = coordinator.stop_browser().await.unwrap();
        assert!(message.contains("no browser"));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_list_browsers_never_empty() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::start(test_settings(dir.path())).await.unwrap();
        let lines = coordinator.list_browsers().await;
        assert!(!lines.is_empty());
        coordinator.shutdown().await;
    }
}
