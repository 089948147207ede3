//! Configuration management for the coordinator.
//!
//! Supports loading settings from TOML/JSON files, environment variable
//! overrides, and CLI arguments, in that precedence order.

mod settings;

pub use settings::{CliArgs, ConfigError, CoordinatorSettings};
