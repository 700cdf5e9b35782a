//! Model configuration
//!
//! Everything the model needs to know about the daemon it talks to: where
//! the manager object lives, how capability identifiers are namespaced and
//! which processes to launch for the daemon and its preferences UI.
//!
//! ## Example
//!
//! ```rust
//! use mconnect_core::config::ModelConfig;
//!
//! let config = ModelConfig::from_json_str(r#"{ "capability_prefix": "cconnect." }"#).unwrap();
//! assert_eq!(config.capability_prefix, "cconnect.");
//! assert_eq!(config.manager_path, "/org/mconnect/manager");
//! ```

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default DeviceManager object path
pub const DEFAULT_MANAGER_PATH: &str = "/org/mconnect/manager";

/// Default namespace prefix of capability identifiers
pub const DEFAULT_CAPABILITY_PREFIX: &str = "kdeconnect.";

/// Default delay after spawning a process (milliseconds)
pub const DEFAULT_SPAWN_DELAY_MS: u64 = 10;

/// A program plus its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchCommand {
    /// Executable name or path
    pub program: String,

    /// Arguments passed verbatim
    #[serde(default)]
    pub args: Vec<String>,
}

impl LaunchCommand {
    /// Create a new launch command
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Command line for log output
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Configuration for the device model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Object path of the remote DeviceManager
    pub manager_path: String,

    /// Prefix stripped from outgoing capabilities to get a plugin short name
    pub capability_prefix: String,

    /// Backend daemon command
    pub daemon: LaunchCommand,

    /// Preferences UI command
    pub settings: LaunchCommand,

    /// Delay after each launch so the process can start listening
    pub spawn_delay_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            manager_path: DEFAULT_MANAGER_PATH.to_string(),
            capability_prefix: DEFAULT_CAPABILITY_PREFIX.to_string(),
            daemon: LaunchCommand::new("mconnect", &["-d"]),
            settings: LaunchCommand::new(
                "gnome-shell-extension-prefs",
                &["mconnect@andyholmes.github.io"],
            ),
            spawn_delay_ms: DEFAULT_SPAWN_DELAY_MS,
        }
    }
}

impl ModelConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Builder: Set capability prefix
    pub fn with_capability_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.capability_prefix = prefix.into();
        self
    }

    /// Builder: Set manager object path
    pub fn with_manager_path(mut self, path: impl Into<String>) -> Self {
        self.manager_path = path.into();
        self
    }

    /// Builder: Set spawn delay
    pub fn with_spawn_delay(mut self, delay: Duration) -> Self {
        self.spawn_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Spawn delay as a Duration
    pub fn spawn_delay(&self) -> Duration {
        Duration::from_millis(self.spawn_delay_ms)
    }

    /// Strip the capability prefix, yielding the plugin short name
    ///
    /// Returns `None` for identifiers outside the namespace.
    pub fn short_capability_name<'a>(&self, capability: &'a str) -> Option<&'a str> {
        capability
            .strip_prefix(self.capability_prefix.as_str())
            .filter(|name| !name.is_empty())
    }

    fn validate(&self) -> Result<()> {
        if !self.manager_path.starts_with('/') {
            return Err(ModelError::config(format!(
                "manager_path must be an absolute object path, got '{}'",
                self.manager_path
            )));
        }
        if self.daemon.program.is_empty() || self.settings.program.is_empty() {
            return Err(ModelError::config("launch commands need a program"));
        }
        Ok(())
    }
}
