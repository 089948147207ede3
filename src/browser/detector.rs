//! Installed-browser detection.
//!
//! Walks a platform-keyed table of well-known executable locations and, on
//! POSIX systems where the table comes up empty, falls back to resolving a
//! small closed set of binary names through `PATH`. Browsers that expose
//! neither a CDP nor a WebDriver BiDi endpoint are never reported.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Browser family tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chrome,
    Edge,
    Chromium,
    Brave,
    Firefox,
    Other,
}

impl BrowserKind {
    /// Human-readable product name.
    pub fn display_name(&self) -> &'static str {
        match self {
            BrowserKind::Chrome => "Google Chrome",
            BrowserKind::Edge => "Microsoft Edge",
            BrowserKind::Chromium => "Chromium",
            BrowserKind::Brave => "Brave",
            BrowserKind::Firefox => "Firefox",
            BrowserKind::Other => "Browser",
        }
    }

    /// Whether this family speaks the Chrome DevTools Protocol.
    pub fn speaks_cdp(&self) -> bool {
        matches!(
            self,
            BrowserKind::Chrome | BrowserKind::Edge | BrowserKind::Chromium | BrowserKind::Brave
        )
    }

    /// Whether this family speaks WebDriver BiDi.
    pub fn speaks_bidi(&self) -> bool {
        matches!(self, BrowserKind::Firefox)
    }
}

impl std::fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserKind::Chrome => write!(f, "chrome"),
            BrowserKind::Edge => write!(f, "edge"),
            BrowserKind::Chromium => write!(f, "chromium"),
            BrowserKind::Brave => write!(f, "brave"),
            BrowserKind::Firefox => write!(f, "firefox"),
            BrowserKind::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for BrowserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chrome" | "google-chrome" => Ok(BrowserKind::Chrome),
            "edge" | "msedge" | "microsoft-edge" => Ok(BrowserKind::Edge),
            "chromium" => Ok(BrowserKind::Chromium),
            "brave" => Ok(BrowserKind::Brave),
            "firefox" => Ok(BrowserKind::Firefox),
            _ => Err(format!(
                "unknown browser kind: {}. Valid kinds are: chrome, edge, chromium, brave, firefox",
                s
            )),
        }
    }
}

/// An installed browser found on this machine.
///
/// Immutable once created; produced only by [`enumerate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserDescriptor {
    /// Human-readable name, e.g. "Google Chrome".
    pub name: String,

    /// Family tag.
    pub kind: BrowserKind,

    /// Absolute path to the executable.
    pub path: PathBuf,

    /// Speaks the Chrome DevTools Protocol.
    pub supports_cdp: bool,

    /// Speaks WebDriver BiDi.
    pub supports_bidi: bool,
}

impl BrowserDescriptor {
    fn new(kind: BrowserKind, path: PathBuf) -> Self {
        Self {
            name: kind.display_name().to_string(),
            kind,
            path,
            supports_cdp: kind.speaks_cdp(),
            supports_bidi: kind.speaks_bidi(),
        }
    }
}

/// Preferred lookup order when no explicit kind is requested.
const PICK_PRIORITY: [BrowserKind; 4] = [
    BrowserKind::Chrome,
    BrowserKind::Edge,
    BrowserKind::Chromium,
    BrowserKind::Brave,
];

/// Enumeration order for the candidate-path table.
const ENUMERATE_ORDER: [BrowserKind; 5] = [
    BrowserKind::Chrome,
    BrowserKind::Edge,
    BrowserKind::Chromium,
    BrowserKind::Brave,
    BrowserKind::Firefox,
];

/// Well-known executable locations for a browser family on this platform.
fn candidate_paths(kind: BrowserKind) -> Vec<&'static str> {
    match kind {
        BrowserKind::Chrome => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"]
            } else if cfg!(target_os = "windows") {
                vec![
                    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
                ]
            } else {
                vec![
                    "/usr/bin/google-chrome",
                    "/usr/bin/google-chrome-stable",
                    "/opt/google/chrome/chrome",
                ]
            }
        }
        BrowserKind::Edge => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"]
            } else if cfg!(target_os = "windows") {
                vec![
                    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
                    r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
                ]
            } else {
                vec!["/usr/bin/microsoft-edge", "/usr/bin/microsoft-edge-stable"]
            }
        }
        BrowserKind::Chromium => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Chromium.app/Contents/MacOS/Chromium"]
            } else if cfg!(target_os = "windows") {
                vec![r"C:\Program Files\Chromium\Application\chrome.exe"]
            } else {
                vec![
                    "/usr/bin/chromium",
                    "/usr/bin/chromium-browser",
                    "/snap/bin/chromium",
                ]
            }
        }
        BrowserKind::Brave => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Brave Browser.app/Contents/MacOS/Brave Browser"]
            } else if cfg!(target_os = "windows") {
                vec![r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe"]
            } else {
                vec!["/usr/bin/brave-browser", "/usr/bin/brave"]
            }
        }
        BrowserKind::Firefox => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Firefox.app/Contents/MacOS/firefox"]
            } else if cfg!(target_os = "windows") {
                vec![
                    r"C:\Program Files\Mozilla Firefox\firefox.exe",
                    r"C:\Program Files (x86)\Mozilla Firefox\firefox.exe",
                ]
            } else {
                vec!["/usr/bin/firefox", "/snap/bin/firefox"]
            }
        }
        BrowserKind::Other => vec![],
    }
}

/// Binary names consulted through `PATH` when the table finds nothing.
#[cfg(unix)]
const PATH_FALLBACK_NAMES: [&str; 8] = [
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "microsoft-edge",
    "brave-browser",
    "firefox",
    "chrome",
];

/// Classify a resolved binary by name.
///
/// Substring rules: `edge` wins over `chromium` wins over `firefox`;
/// everything else is treated as Chrome.
pub(crate) fn classify_binary_name(name: &str) -> BrowserKind {
    let lower = name.to_lowercase();
    if lower.contains("edge") {
        BrowserKind::Edge
    } else if lower.contains("chromium") {
        BrowserKind::Chromium
    } else if lower.contains("firefox") {
        BrowserKind::Firefox
    } else {
        BrowserKind::Chrome
    }
}

/// Enumerate installed browsers in priority order.
///
/// For each family, the first existing candidate path is emitted. On POSIX,
/// an empty table result falls back to `PATH` resolution over a closed name
/// set. Never fails; an empty vector means no usable browser is installed.
pub fn enumerate() -> Vec<BrowserDescriptor> {
    let mut found = Vec::new();

    for kind in ENUMERATE_ORDER {
        if !kind.speaks_cdp() && !kind.speaks_bidi() {
            continue;
        }
        for candidate in candidate_paths(kind) {
            let path = Path::new(candidate);
            if path.exists() {
                debug!(kind = %kind, path = %path.display(), "found installed browser");
                found.push(BrowserDescriptor::new(kind, path.to_path_buf()));
                break;
            }
        }
    }

    #[cfg(unix)]
    if found.is_empty() {
        for name in PATH_FALLBACK_NAMES {
            if let Ok(resolved) = which::which(name) {
                let kind = classify_binary_name(name);
                if !kind.speaks_cdp() && !kind.speaks_bidi() {
                    continue;
                }
                if found
                    .iter()
                    .any(|d: &BrowserDescriptor| d.kind == kind)
                {
                    continue;
                }
                debug!(kind = %kind, path = %resolved.display(), "found browser via PATH");
                found.push(BrowserDescriptor::new(kind, resolved));
            }
        }
    }

    found
}

/// Pick a browser for launching.
///
/// With a `preferred` kind, the first descriptor of that kind carrying the
/// requisite capability (CDP for the Chromium family, BiDi for Firefox) is
/// returned. Without one, the {chrome, edge, chromium, brave} priority order
/// applies. Returns `None` when nothing usable is installed.
pub fn pick(
    preferred: Option<BrowserKind>,
    installed: &[BrowserDescriptor],
) -> Option<BrowserDescriptor> {
    if let Some(kind) = preferred {
        return installed
            .iter()
            .find(|d| {
                d.kind == kind
                    && if kind == BrowserKind::Firefox {
                        d.supports_bidi
                    } else {
                        d.supports_cdp
                    }
            })
            .cloned();
    }

    for kind in PICK_PRIORITY {
        if let Some(found) = installed.iter().find(|d| d.kind == kind && d.supports_cdp) {
            return Some(found.clone());
        }
    }
    None
}
