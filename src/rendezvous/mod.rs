//! Filesystem rendezvous state for sibling processes.
//!
//! A small JSON record at `<os-temp>/browser-coordinator/state.json` tells
//! sibling processes which proxy port the live coordinator publishes. The
//! file is a discovery hint, not an authority: readers must treat a missing
//! or malformed record as "not running" and verify liveness by connecting.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory name under the OS temp dir.
const STATE_DIR: &str = "browser-coordinator";

/// File name of the rendezvous record.
const STATE_FILE: &str = "state.json";

/// The published coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendezvousRecord {
    /// Stable proxy port downstream clients connect to.
    pub port: u16,

    /// Process id of the coordinator that wrote the record.
    pub pid: i32,
}

/// Default rendezvous path: `<os-temp>/browser-coordinator/state.json`.
pub fn state_path() -> PathBuf {
    std::env::temp_dir().join(STATE_DIR).join(STATE_FILE)
}

/// Write the record at the default path.
///
/// Failure is logged and swallowed: a coordinator that cannot publish its
/// rendezvous hint still runs.
pub fn write(record: &RendezvousRecord) {
    write_at(&state_path(), record);
}

/// Write the record at an explicit path.
pub fn write_at(path: &Path, record: &RendezvousRecord) {
    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(record)
            .map_err(|e| std::io::Error::other(e))?;
        std::fs::write(path, json)
    })();

    match result {
        Ok(()) => debug!(path = %path.display(), port = record.port, "rendezvous state written"),
        Err(e) => warn!(path = %path.display(), "failed to write rendezvous state: {}", e),
    }
}

/// Read the record at the default path.
pub fn read() -> Option<RendezvousRecord> {
    read_at(&state_path())
}

/// Read the record at an explicit path.
///
/// Returns `None` when the file is absent, unreadable, not valid JSON, or
/// missing either integer field.
pub fn read_at(path: &Path) -> Option<RendezvousRecord> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

/// Best-effort removal of the record at the default path.
pub fn clear() {
    clear_at(&state_path());
}

/// Best-effort removal at an explicit path.
pub fn clear_at(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "rendezvous state cleared"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), "failed to clear rendezvous state: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let record = RendezvousRecord {
            port: 41837,
            pid: 4242,
        };

        write_at(&path, &record);
        assert_eq!(read_at(&path), Some(record));
    }

    #[test]
    fn test_clear_then_read_returns_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_at(&path, &RendezvousRecord { port: 1, pid: 2 });

        clear_at(&path);
        assert_eq!(read_at(&path), None);

        // Clearing an absent file is fine.
        clear_at(&path);
    }

    #[test]
    fn test_read_absent_returns_none() {
        let dir = tempdir().unwrap();
        assert_eq!(read_at(&dir.path().join("missing.json")), None);
    }

    #[test]
    fn test_read_malformed_returns_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        std::fs::write(&path, "not json at all").unwrap();
        assert_eq!(read_at(&path), None);

        std::fs::write(&path, r#"{"port": "not-a-number", "pid": 1}"#).unwrap();
        assert_eq!(read_at(&path), None);

        std::fs::write(&path, r#"{"pid": 1}"#).unwrap();
        assert_eq!(read_at(&path), None);
    }

    #[test]
    fn test_write_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let record = RendezvousRecord { port: 9, pid: 9 };

        write_at(&path, &record);
        assert_eq!(read_at(&path), Some(record));
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(RendezvousRecord {
            port: 41837,
            pid: 100,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"port": 41837, "pid": 100}));
    }
}
