//! Deterministic per-workspace socket path derivation.
//!
//! The socket name embeds the first 8 hex characters of the SHA-256 of the
//! absolute workspace path. The hash is a naming convention, not a security
//! boundary; any stable digest with a low collision rate across plausible
//! workspace paths on one machine would do.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Application directory name used under the per-user data dir.
pub const APP_DIR: &str = "browser-coordinator";

/// Socket file name prefix.
pub const SOCKET_PREFIX: &str = "ipc-";

/// Socket file name suffix on POSIX.
pub const SOCKET_SUFFIX: &str = ".sock";

/// First 8 hex characters of SHA-256 over the absolute workspace path.
pub fn workspace_hash(workspace: &Path) -> String {
    let absolute = if workspace.is_absolute() {
        workspace.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_default()
            .join(workspace)
    };
    let digest = Sha256::digest(absolute.to_string_lossy().as_bytes());
    hex::encode(digest)[..8].to_string()
}

/// Per-user data directory for this application.
///
/// POSIX: `$XDG_DATA_HOME/browser-coordinator` with the usual
/// `~/.local/share` fallback. Created on demand by callers that bind.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

/// Socket path for a workspace inside an explicit data directory.
pub fn socket_path_in(dir: &Path, workspace: &Path) -> PathBuf {
    dir.join(format!(
        "{}{}{}",
        SOCKET_PREFIX,
        workspace_hash(workspace),
        SOCKET_SUFFIX
    ))
}

/// Socket path for a workspace in the default data directory.
#[cfg(unix)]
pub fn socket_path(workspace: &Path) -> PathBuf {
    socket_path_in(&data_dir(), workspace)
}

/// Named-pipe path for a workspace.
#[cfg(windows)]
pub fn socket_path(workspace: &Path) -> PathBuf {
    PathBuf::from(format!(
        r"\\.\pipe\{}-{}",
        APP_DIR,
        workspace_hash(workspace)
    ))
}

/// Whether a file name looks like one of our socket files.
pub fn is_socket_file_name(name: &str) -> bool {
    name.starts_with(SOCKET_PREFIX) && name.ends_with(SOCKET_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_and_short() {
        let first = workspace_hash(Path::new("/home/user/project"));
        let second = workspace_hash(Path::new("/home/user/project"));
        assert_eq!(first, second);
        assert_eq!(first.len(), 8);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_distinguishes_workspaces() {
        let a = workspace_hash(Path::new("/home/user/project-a"));
        let b = workspace_hash(Path::new("/home/user/project-b"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_socket_path_shape() {
        let path = socket_path_in(Path::new("/data"), Path::new("/workspace"));
        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("ipc-"));
        assert!(name.ends_with(".sock"));
        assert_eq!(path.parent().unwrap(), Path::new("/data"));
    }

    #[test]
    fn test_is_socket_file_name() {
        assert!(is_socket_file_name("ipc-aaaaaaaa.sock"));
        assert!(!is_socket_file_name("ipc-aaaaaaaa.txt"));
        assert!(!is_socket_file_name("state.json"));
    }
}
