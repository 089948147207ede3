//! Wrap-style invocation of a downstream program.
//!
//! `wrap -- <program> <args…>` waits for a live rendezvous record,
//! substitutes `{cdp_port}` and `{cdp_endpoint}` in the argument strings,
//! then runs the program with inherited standard I/O and environment.
//! SIGINT/SIGTERM/SIGHUP are forwarded; the child's exit code is returned
//! verbatim.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::rendezvous::{self, RendezvousRecord};

/// Backoff between rendezvous polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long to wait for a coordinator to appear.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Replace `{cdp_port}` and `{cdp_endpoint}` in every argument.
pub fn substitute_templates(args: &[String], port: u16) -> Vec<String> {
    let endpoint = format!("http://localhost:{}", port);
    args.iter()
        .map(|arg| {
            arg.replace("{cdp_port}", &port.to_string())
                .replace("{cdp_endpoint}", &endpoint)
        })
        .collect()
}

/// Poll the rendezvous file until a record appears or the wait expires.
pub async fn wait_for_rendezvous(path: &Path, timeout: Duration) -> Option<RendezvousRecord> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(record) = rendezvous::read_at(path) {
            return Some(record);
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Run the wrapped program and return its exit code.
pub async fn run(program: &str, args: &[String]) -> Result<i32> {
    let record = wait_for_rendezvous(&rendezvous::state_path(), WAIT_TIMEOUT)
        .await
        .context(
            "no running coordinator found (rendezvous state absent); start the coordinator first",
        )?;
    debug!(port = record.port, pid = record.pid, "found coordinator");

    let args = substitute_templates(args, record.port);
    let mut child = Command::new(program)
        .args(&args)
        .spawn()
        .with_context(|| format!("failed to spawn {}", program))?;

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;

        // The pid is snapshotted up front; once the child is reaped the
        // signal arms never run again.
        let pid = child.id();
        loop {
            tokio::select! {
                status = child.wait() => {
                    return Ok(exit_code(status?));
                }
                _ = interrupt.recv() => forward_signal(pid, libc::SIGINT),
                _ = terminate.recv() => forward_signal(pid, libc::SIGTERM),
                _ = hangup.recv() => forward_signal(pid, libc::SIGHUP),
            }
        }
    }

    #[cfg(not(unix))]
    {
        Ok(exit_code(child.wait().await?))
    }
}

#[cfg(unix)]
fn forward_signal(pid: Option<u32>, signal: libc::c_int) {
    if let Some(pid) = pid {
        debug!(pid, signal, "forwarding signal to wrapped process");
        unsafe {
            libc::kill(pid as libc::pid_t, signal);
        }
    } else {
        warn!("cannot forward signal; wrapped process already reaped");
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
