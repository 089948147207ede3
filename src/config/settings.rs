//! Coordinator settings and configuration loading.
//!
//! Settings follow a precedence chain: defaults, then a TOML or JSON file,
//! then `BROWSER_COORDINATOR_*` environment variables, then CLI arguments.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::browser::BrowserKind;

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML configuration.
    #[error("failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),

    /// Failed to parse JSON configuration.
    #[error("failed to parse JSON configuration: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    ValidationError(String),

    /// Unsupported file format.
    #[error("unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

/// Main coordinator configuration.
///
/// # Configuration Precedence
///
/// Settings are applied in the following order (later sources override
/// earlier):
/// 1. Default values
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables (`BROWSER_COORDINATOR_*`)
/// 4. CLI arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    /// Proxy listen port; 0 lets the OS assign one.
    #[serde(default)]
    pub proxy_port: u16,

    /// Launch browsers headless by default.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Preferred browser kind for launches without an explicit one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserKind>,

    /// Workspace root used for editor-host socket derivation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,

    /// Probe for an editor-host endpoint at startup.
    #[serde(default = "default_detect_editor")]
    pub detect_editor: bool,

    /// Hard deadline for the browser readiness line, in seconds.
    #[serde(default = "default_readiness_timeout_secs")]
    pub readiness_timeout_secs: u64,

    /// Timeout for an IPC round trip, in seconds.
    #[serde(default = "default_ipc_timeout_secs")]
    pub ipc_timeout_secs: u64,

    /// Default bound for in-browser evaluations, in seconds.
    #[serde(default = "default_eval_timeout_secs")]
    pub eval_timeout_secs: u64,

    /// Directory screenshots are saved into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_dir: Option<PathBuf>,

    /// Override for the rendezvous state file location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendezvous_path: Option<PathBuf>,
}

fn default_headless() -> bool {
    true
}

fn default_detect_editor() -> bool {
    true
}

fn default_readiness_timeout_secs() -> u64 {
    15
}

fn default_ipc_timeout_secs() -> u64 {
    5
}

fn default_eval_timeout_secs() -> u64 {
    30
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            proxy_port: 0,
            headless: default_headless(),
            browser: None,
            workspace: None,
            detect_editor: default_detect_editor(),
            readiness_timeout_secs: default_readiness_timeout_secs(),
            ipc_timeout_secs: default_ipc_timeout_secs(),
            eval_timeout_secs: default_eval_timeout_secs(),
            screenshot_dir: None,
            rendezvous_path: None,
        }
    }
}

impl CoordinatorSettings {
    /// Creates settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings from a configuration file.
    ///
    /// Supports TOML and JSON, detected by file extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "toml" => Ok(toml::from_str(&content)?),
            "json" => Ok(serde_json::from_str(&content)?),
            ext => Err(ConfigError::UnsupportedFormat(ext.to_string())),
        }
    }

    /// Applies `BROWSER_COORDINATOR_*` overrides from the process
    /// environment.
    pub fn merge_with_env(self) -> Self {
        self.apply_env_overrides(std::env::vars())
    }

    /// Applies overrides from an explicit variable set.
    pub(crate) fn apply_env_overrides(
        mut self,
        vars: impl Iterator<Item = (String, String)>,
    ) -> Self {
        for (key, value) in vars {
            match key.as_str() {
                "BROWSER_COORDINATOR_PROXY_PORT" => {
                    if let Ok(port) = value.parse() {
                        self.proxy_port = port;
                    }
                }
                "BROWSER_COORDINATOR_HEADLESS" => {
                    if let Ok(flag) = value.parse() {
                        self.headless = flag;
                    }
                }
                "BROWSER_COORDINATOR_BROWSER" => {
                    if let Ok(kind) = value.parse() {
                        self.browser = Some(kind);
                    }
                }
                "BROWSER_COORDINATOR_WORKSPACE" => {
                    self.workspace = Some(PathBuf::from(value));
                }
                "BROWSER_COORDINATOR_DETECT_EDITOR" => {
                    if let Ok(flag) = value.parse() {
                        self.detect_editor = flag;
                    }
                }
                "BROWSER_COORDINATOR_SCREENSHOT_DIR" => {
                    self.screenshot_dir = Some(PathBuf::from(value));
                }
                _ => {}
            }
        }
        self
    }

    /// Applies CLI argument overrides.
    pub fn merge_with_cli(mut self, args: &CliArgs) -> Self {
        if let Some(port) = args.proxy_port {
            self.proxy_port = port;
        }
        if let Some(headless) = args.headless {
            self.headless = headless;
        }
        if let Some(kind) = args.browser {
            self.browser = Some(kind);
        }
        if let Some(ref workspace) = args.workspace {
            self.workspace = Some(workspace.clone());
        }
        if let Some(detect) = args.detect_editor {
            self.detect_editor = detect;
        }
        self
    }

    /// Validates the merged settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.readiness_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "readiness timeout must be at least 1 second".to_string(),
            ));
        }
        if self.ipc_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "IPC timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the proxy port.
    pub fn with_proxy_port(mut self, port: u16) -> Self {
        self.proxy_port = port;
        self
    }

    /// Sets headless mode.
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Sets the workspace root.
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Enables or disables editor detection.
    pub fn with_detect_editor(mut self, detect: bool) -> Self {
        self.detect_editor = detect;
        self
    }
}

/// Overrides collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Configuration file path.
    pub config_file: Option<PathBuf>,

    /// Proxy listen port.
    pub proxy_port: Option<u16>,

    /// Headless mode.
    pub headless: Option<bool>,

    /// Preferred browser kind.
    pub browser: Option<BrowserKind>,

    /// Workspace root.
    pub workspace: Option<PathBuf>,

    /// Editor detection toggle.
    pub detect_editor: Option<bool>,
}

impl CliArgs {
    /// Creates an empty CliArgs instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the final settings from the full precedence chain.
    pub fn resolve(&self) -> Result<CoordinatorSettings, ConfigError> {
        let base = match self.config_file {
            Some(ref path) => CoordinatorSettings::from_file(path)?,
            None => CoordinatorSettings::default(),
        };
        let settings = base.merge_with_env().merge_with_cli(self);
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = CoordinatorSettings::default();
        assert_eq!(settings.proxy_port, 0);
        assert!(settings.headless);
        assert!(settings.detect_editor);
        assert_eq!(settings.readiness_timeout_secs, 15);
        assert_eq!(settings.ipc_timeout_secs, 5);
        assert_eq!(settings.eval_timeout_secs, 30);
        settings.validate().unwrap();
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "proxy_port = 9400\nheadless = false\nbrowser = \"edge\"\n",
        )
        .unwrap();

        let settings = CoordinatorSettings::from_file(&path).unwrap();
        assert_eq!(settings.proxy_port, 9400);
        assert!(!settings.headless);
        assert_eq!(settings.browser, Some(BrowserKind::Edge));
        // Unspecified fields keep their defaults.
        assert!(settings.detect_editor);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"proxy_port": 9500, "detect_editor": false}"#).unwrap();

        let settings = CoordinatorSettings::from_file(&path).unwrap();
        assert_eq!(settings.proxy_port, 9500);
        assert!(!settings.detect_editor);
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "proxy_port: 1").unwrap();

        assert!(matches!(
            CoordinatorSettings::from_file(&path),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars = vec![
            (
                "BROWSER_COORDINATOR_PROXY_PORT".to_string(),
                "9600".to_string(),
            ),
            (
                "BROWSER_COORDINATOR_HEADLESS".to_string(),
                "false".to_string(),
            ),
            (
                "BROWSER_COORDINATOR_BROWSER".to_string(),
                "brave".to_string(),
            ),
            ("UNRELATED_VARIABLE".to_string(), "ignored".to_string()),
        ];

        let settings = CoordinatorSettings::default().apply_env_overrides(vars.into_iter());
        assert_eq!(settings.proxy_port, 9600);
        assert!(!settings.headless);
        assert_eq!(settings.browser, Some(BrowserKind::Brave));
    }

    #[test]
    fn test_cli_overrides_env() {
        let vars = vec![(
            "BROWSER_COORDINATOR_PROXY_PORT".to_string(),
            "9600".to_string(),
        )];
        let args = CliArgs {
            proxy_port: Some(9700),
            headless: Some(false),
            ..Default::default()
        };

        let settings = CoordinatorSettings::default()
            .apply_env_overrides(vars.into_iter())
            .merge_with_cli(&args);
        assert_eq!(settings.proxy_port, 9700);
        assert!(!settings.headless);
    }

    #[test]
    fn test_validation_rejects_zero_timeouts() {
        let settings = CoordinatorSettings {
            readiness_timeout_secs: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
