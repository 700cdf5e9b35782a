//! Logging setup
//!
//! Library code only emits `tracing` events; embedding applications may
//! install their own subscriber or call [`init`] once at startup.

use crate::error::{ModelError, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber filtered by `log_level`
///
/// `log_level` accepts any `EnvFilter` directive (`"debug"`,
/// `"mconnect_core=trace"`, ...). Unparseable directives fall back to `info`.
/// Fails if a global subscriber is already installed.
pub fn init(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| ModelError::config(format!("Failed to initialize logging: {}", e)))?;

    info!("mconnect-core initialized with log level: {}", log_level);
    Ok(())
}
