//! Integration tests for the browser launcher
//!
//! Uses small shell stubs in place of a real browser so the readiness
//! protocol, the timeout path, and two-phase termination can be exercised
//! hermetically.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use browser_coordinator::browser::detector::{BrowserDescriptor, BrowserKind};
use browser_coordinator::browser::launcher::{
    alloc_debug_port, launch, stop, LaunchError, LaunchOptions,
};

/// Write an executable shell stub and return a descriptor pointing at it.
fn stub_browser(dir: &Path, script_body: &str) -> BrowserDescriptor {
    let path = dir.join("stub-browser");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", script_body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    BrowserDescriptor {
        name: "Stub Browser".to_string(),
        kind: BrowserKind::Chromium,
        path,
        supports_cdp: true,
        supports_bidi: false,
    }
}

/// Options tuned for fast tests: short readiness and HTTP-probe windows.
fn fast_options() -> LaunchOptions {
    LaunchOptions::default()
        .readiness_timeout(Duration::from_millis(800))
        .http_probe_timeout(Duration::from_millis(100))
}

#[tokio::test]
async fn silent_stub_hits_readiness_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = stub_browser(dir.path(), "exec sleep 30");

    let started = Instant::now();
    let result = launch(&descriptor, alloc_debug_port().unwrap(), &fast_options()).await;

    match result {
        Err(LaunchError::ReadinessTimeout(_)) => {}
        other => panic!("expected readiness timeout, got {:?}", other),
    }
    // Well inside the configured window plus kill overhead, nowhere near
    // the sleep duration.
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn early_exit_is_reported_with_its_code() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = stub_browser(dir.path(), "exit 7");

    let result = launch(&descriptor, alloc_debug_port().unwrap(), &fast_options()).await;
    match result {
        Err(LaunchError::ProcessExited { code }) => assert_eq!(code, Some(7)),
        other => panic!("expected early-exit error, got {:?}", other),
    }
}

#[tokio::test]
async fn missing_binary_is_a_spawn_error() {
    let descriptor = BrowserDescriptor {
        name: "Ghost".to_string(),
        kind: BrowserKind::Chrome,
        path: PathBuf::from("/nonexistent/browser/binary"),
        supports_cdp: true,
        supports_bidi: false,
    };

    let result = launch(&descriptor, alloc_debug_port().unwrap(), &fast_options()).await;
    assert!(matches!(result, Err(LaunchError::Spawn(_))));
}

#[tokio::test]
async fn readiness_line_is_parsed_and_stop_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = stub_browser(
        dir.path(),
        "echo \"DevTools listening on ws://127.0.0.1:39999/devtools/browser/test-id\" >&2\n\
         exec sleep 30",
    );

    let instance = launch(&descriptor, alloc_debug_port().unwrap(), &fast_options())
        .await
        .unwrap();

    assert_eq!(
        instance.devtools_url,
        "ws://127.0.0.1:39999/devtools/browser/test-id"
    );
    assert!(instance.profile_dir.exists());
    assert!(instance.pid().is_some());

    let profile = instance.profile_dir.clone();
    let started = Instant::now();
    stop(instance).await;

    // The sleep stub dies on SIGTERM, well before the SIGKILL escalation.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!profile.exists(), "profile directory must be removed");
}

#[tokio::test]
async fn stderr_noise_before_readiness_is_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = stub_browser(
        dir.path(),
        "echo \"[warning] something harmless\" >&2\n\
         echo \"[error] still harmless\" >&2\n\
         echo \"DevTools listening on ws://127.0.0.1:40000/devtools/browser/x\" >&2\n\
         exec sleep 30",
    );

    let instance = launch(&descriptor, alloc_debug_port().unwrap(), &fast_options())
        .await
        .unwrap();
    assert_eq!(
        instance.devtools_url,
        "ws://127.0.0.1:40000/devtools/browser/x"
    );
    stop(instance).await;
}
