//! Process launcher
//!
//! Fire-and-forget launches of the daemon and its preferences UI. A launch
//! never fails the caller: errors are logged and reported as `false`.
//! Successful launches are followed by the configured spawn delay so the
//! new process can start listening.

use crate::config::{LaunchCommand, ModelConfig};
use crate::error::{ModelError, Result};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

/// Start the daemon; returns whether the process was spawned
pub fn start_daemon(config: &ModelConfig) -> bool {
    launch(&config.daemon, config.spawn_delay())
}

/// Open the preferences UI; returns whether the process was spawned
pub fn start_settings(config: &ModelConfig) -> bool {
    launch(&config.settings, config.spawn_delay())
}

fn launch(command: &LaunchCommand, delay: Duration) -> bool {
    match spawn_detached(command) {
        Ok(()) => {
            thread::sleep(delay);
            true
        }
        Err(e) => {
            error!("{}", e);
            false
        }
    }
}

fn spawn_detached(command: &LaunchCommand) -> Result<()> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ModelError::launch(format!("{} failed to start: {}", command.display(), e)))?;

    info!("Launched '{}' (pid {})", command.display(), child.id());

    // Reap the child so it does not linger as a zombie
    let name = command.program.clone();
    thread::spawn(move || match child.wait() {
        Ok(status) => debug!("{} exited with {}", name, status),
        Err(e) => debug!("Failed to wait for {}: {}", name, e),
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(daemon: LaunchCommand) -> ModelConfig {
        ModelConfig {
            daemon,
            ..Default::default()
        }
        .with_spawn_delay(Duration::ZERO)
    }

    #[test]
    #[cfg(unix)]
    fn test_start_daemon() {
        assert!(start_daemon(&config_with(LaunchCommand::new("true", &[]))));
    }

    #[test]
    fn test_missing_program_is_not_fatal() {
        let config = config_with(LaunchCommand::new("mconnect-core-test-no-such-binary", &["-d"]));
        assert!(!start_daemon(&config));
    }

    #[test]
    fn test_start_settings_missing_program() {
        let mut config = config_with(LaunchCommand::new("true", &[]));
        config.settings = LaunchCommand::new("mconnect-core-test-no-such-prefs", &[]);
        assert!(!start_settings(&config));
    }
}
