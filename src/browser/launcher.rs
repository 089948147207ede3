//! Browser process lifecycle: spawn, readiness detection, termination.
//!
//! A launch pre-allocates a loopback TCP port, spawns the browser with its
//! debugging flags pointed at a fresh temporary profile, then watches the
//! child's stderr for the readiness line that names the DevTools (or
//! WebDriver BiDi) endpoint. Termination is two-phase: SIGTERM, a grace
//! period, then SIGKILL, followed by best-effort profile cleanup.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::browser::detector::{BrowserDescriptor, BrowserKind};

/// Protocol engine a launched browser exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Chromium,
    Firefox,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Chromium => write!(f, "chromium"),
            Engine::Firefox => write!(f, "firefox"),
        }
    }
}

impl From<BrowserKind> for Engine {
    fn from(kind: BrowserKind) -> Self {
        match kind {
            BrowserKind::Firefox => Engine::Firefox,
            _ => Engine::Chromium,
        }
    }
}

/// Errors surfaced by [`launch`].
#[derive(Debug, Error)]
pub enum LaunchError {
    /// No usable browser was found on this machine.
    #[error("no supported browser found on this machine")]
    NoBrowser,

    /// The executable could not be spawned.
    #[error("failed to spawn browser process: {0}")]
    Spawn(#[source] std::io::Error),

    /// The readiness line never appeared within the deadline.
    #[error("browser did not report a debugging endpoint within {0:?}")]
    ReadinessTimeout(Duration),

    /// The process exited before reporting readiness.
    #[error("browser process exited before becoming ready (exit code {code:?})")]
    ProcessExited { code: Option<i32> },

    /// I/O failure while supervising the child.
    #[error("browser supervision failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Tunable knobs for a single launch.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Run without a visible window.
    pub headless: bool,

    /// Hard deadline for the stderr readiness line.
    pub readiness_timeout: Duration,

    /// Advisory window for the post-readiness HTTP endpoint poll.
    pub http_probe_timeout: Duration,

    /// Extra arguments appended before the trailing `about:blank`.
    pub extra_args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            readiness_timeout: Duration::from_secs(15),
            http_probe_timeout: Duration::from_secs(5),
            extra_args: Vec::new(),
        }
    }
}

impl LaunchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    pub fn http_probe_timeout(mut self, timeout: Duration) -> Self {
        self.http_probe_timeout = timeout;
        self
    }
}

/// A running browser owned by the coordinator.
///
/// Single-owner; destroyed through [`stop`].
#[derive(Debug)]
pub struct BrowserInstance {
    /// The descriptor this instance was launched from.
    pub descriptor: BrowserDescriptor,

    /// Protocol engine.
    pub engine: Engine,

    /// Internal debugging port the browser is listening on.
    pub debug_port: u16,

    /// Endpoint URL parsed from the readiness line.
    pub devtools_url: String,

    /// Per-launch isolated profile directory.
    pub profile_dir: PathBuf,

    child: Child,
}

impl BrowserInstance {
    /// OS process id, if the process is still attached.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Grace period between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Bind a throwaway loopback listener on port 0 and return the assigned port.
///
/// The listener is closed before returning; callers accept the small window
/// in which another process could claim the port.
pub fn alloc_debug_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Whether Chromium needs `--no-sandbox` in this environment.
fn needs_no_sandbox() -> bool {
    #[cfg(unix)]
    {
        if unsafe { libc::geteuid() } == 0 {
            return true;
        }
    }
    std::env::var_os("CI").is_some()
}

/// Build the argument vector for a launch.
fn build_args(
    engine: Engine,
    debug_port: u16,
    profile_dir: &std::path::Path,
    opts: &LaunchOptions,
) -> Vec<String> {
    match engine {
        Engine::Chromium => {
            let mut args = vec![
                format!("--remote-debugging-port={}", debug_port),
                format!("--user-data-dir={}", profile_dir.display()),
                "--no-first-run".to_string(),
                "--no-default-browser-check".to_string(),
                "--disable-background-networking".to_string(),
                "--disable-default-apps".to_string(),
                "--disable-extensions".to_string(),
                "--disable-sync".to_string(),
                "--disable-translate".to_string(),
                "--metrics-recording-only".to_string(),
                "--mute-audio".to_string(),
            ];
            if opts.headless {
                args.push("--headless=new".to_string());
            }
            if needs_no_sandbox() {
                args.push("--no-sandbox".to_string());
            }
            args.extend(opts.extra_args.iter().cloned());
            args.push("about:blank".to_string());
            args
        }
        Engine::Firefox => {
            let mut args = vec![
                "--remote-debugging-port".to_string(),
                debug_port.to_string(),
                "--profile".to_string(),
                profile_dir.display().to_string(),
                "--no-remote".to_string(),
            ];
            if opts.headless {
                args.push("--headless".to_string());
            }
            args.extend(opts.extra_args.iter().cloned());
            args.push("about:blank".to_string());
            args
        }
    }
}

/// Extract the endpoint URL from a stderr readiness line, if present.
///
/// Chromium prints `DevTools listening on ws://…`; Firefox prints
/// `WebDriver BiDi listening on ws://…`. Everything else is log noise.
pub(crate) fn parse_readiness_line(engine: Engine, line: &str) -> Option<String> {
    let marker = match engine {
        Engine::Chromium => "DevTools listening on ",
        Engine::Firefox => "WebDriver BiDi listening on ",
    };
    let rest = &line[line.find(marker)? + marker.len()..];
    if !rest.starts_with("ws://") {
        return None;
    }
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

/// Launch a browser and wait for its debugging endpoint.
///
/// The child's stderr is streamed line-buffered until the readiness pattern
/// appears or `opts.readiness_timeout` elapses; on timeout or early exit the
/// process is force-killed and the profile directory removed. For Chromium,
/// the HTTP debugging endpoint is then polled for up to
/// `opts.http_probe_timeout` to surface a late HTTP failure early; a poll
/// timeout is only a warning.
pub async fn launch(
    descriptor: &BrowserDescriptor,
    debug_port: u16,
    opts: &LaunchOptions,
) -> Result<BrowserInstance, LaunchError> {
    let engine = Engine::from(descriptor.kind);
    let profile_dir = tempfile::Builder::new()
        .prefix("browser-coordinator-profile-")
        .tempdir()
        .map_err(LaunchError::Io)?
        .into_path();

    let args = build_args(engine, debug_port, &profile_dir, opts);
    debug!(
        browser = %descriptor.kind,
        port = debug_port,
        profile = %profile_dir.display(),
        "spawning browser"
    );

    let mut child = match Command::new(&descriptor.path)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            cleanup_profile(&profile_dir).await;
            return Err(LaunchError::Spawn(e));
        }
    };

    let stderr = match child.stderr.take() {
        Some(stderr) => stderr,
        None => {
            abort_launch(&mut child, &profile_dir).await;
            return Err(LaunchError::Io(std::io::Error::other(
                "child stderr was not captured",
            )));
        }
    };

    let mut lines = BufReader::new(stderr).lines();
    let deadline = Instant::now() + opts.readiness_timeout;

    let devtools_url = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            abort_launch(&mut child, &profile_dir).await;
            return Err(LaunchError::ReadinessTimeout(opts.readiness_timeout));
        }

        match timeout(remaining, lines.next_line()).await {
            Err(_) => {
                abort_launch(&mut child, &profile_dir).await;
                return Err(LaunchError::ReadinessTimeout(opts.readiness_timeout));
            }
            Ok(Ok(Some(line))) => {
                if let Some(url) = parse_readiness_line(engine, &line) {
                    break url;
                }
                debug!(target: "browser_stderr", "{}", line);
            }
            Ok(Ok(None)) => {
                // stderr EOF means the process is gone.
                let status = child.wait().await.ok();
                cleanup_profile(&profile_dir).await;
                return Err(LaunchError::ProcessExited {
                    code: status.and_then(|s| s.code()),
                });
            }
            Ok(Err(e)) => {
                abort_launch(&mut child, &profile_dir).await;
                return Err(LaunchError::Io(e));
            }
        }
    };

    info!(
        browser = %descriptor.kind,
        port = debug_port,
        endpoint = %devtools_url,
        "browser ready"
    );

    // Keep draining stderr so the pipe never fills.
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "browser_stderr", "{}", line);
        }
    });

    if engine == Engine::Chromium {
        if let Err(elapsed) = probe_http_endpoint(debug_port, opts.http_probe_timeout).await {
            warn!(
                port = debug_port,
                "debugging endpoint did not answer HTTP within {:?}; continuing anyway",
                elapsed
            );
        }
    }

    Ok(BrowserInstance {
        descriptor: descriptor.clone(),
        engine,
        debug_port,
        devtools_url,
        profile_dir,
        child,
    })
}

/// Poll `/json/version` until it answers or the window closes.
async fn probe_http_endpoint(port: u16, window: Duration) -> Result<(), Duration> {
    let url = format!("http://127.0.0.1:{}/json/version", port);
    let deadline = Instant::now() + window;

    loop {
        if let Ok(response) = reqwest::get(&url).await {
            if response.status().is_success() {
                return Ok(());
            }
        }
        if Instant::now() >= deadline {
            return Err(window);
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

/// Stop a running instance: SIGTERM, 5 s grace, then SIGKILL.
///
/// The wait is bounded inline, so nothing outlives the caller. The profile
/// directory is removed afterwards, ignoring errors.
pub async fn stop(mut instance: BrowserInstance) {
    let pid = instance.child.id();
    debug!(pid = ?pid, browser = %instance.descriptor.kind, "stopping browser");

    terminate(&mut instance.child);

    match timeout(TERM_GRACE, instance.child.wait()).await {
        Ok(Ok(status)) => {
            info!(pid = ?pid, ?status, "browser exited");
        }
        Ok(Err(e)) => {
            warn!(pid = ?pid, "wait on browser process failed: {}", e);
        }
        Err(_) => {
            warn!(pid = ?pid, "browser ignored SIGTERM, killing");
            let _ = instance.child.start_kill();
            let _ = instance.child.wait().await;
        }
    }

    cleanup_profile(&instance.profile_dir).await;
}

/// Deliver a graceful termination request to the child.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            return;
        }
    }
    let _ = child.start_kill();
}

/// Force-kill and clean up after a failed launch.
async fn abort_launch(child: &mut Child, profile_dir: &std::path::Path) {
    let _ = child.start_kill();
    let _ = child.wait().await;
    cleanup_profile(profile_dir).await;
}

async fn cleanup_profile(profile_dir: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_dir_all(profile_dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(profile = %profile_dir.display(), "profile cleanup failed: {}", e);
        }
    }
}
