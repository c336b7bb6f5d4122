//! Daemon lifecycle management
//!
//! Functions for spawning the serving process and waiting out the fixed
//! readiness delay.

use std::io;
use std::process::Stdio;

use tokio::process::Command;
use tokio::time::Duration;
use tracing::{debug, info};

use super::handle::DaemonHandle;
use crate::config::DaemonConfig;

/// Error type for daemon launch
#[derive(Debug)]
pub enum LaunchError {
    /// Serving binary not found on PATH or at the given path
    NotFound(String),
    /// Serving binary exists but is not executable
    PermissionDenied(String),
    /// Any other spawn failure
    Spawn(io::Error),
}

impl LaunchError {
    fn from_io(program: &str, e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => LaunchError::NotFound(program.to_string()),
            io::ErrorKind::PermissionDenied => LaunchError::PermissionDenied(program.to_string()),
            _ => LaunchError::Spawn(e),
        }
    }

    /// Exit code reported when the daemon could not be started
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::NotFound(_) => 127,
            LaunchError::PermissionDenied(_) => 126,
            LaunchError::Spawn(_) => 1,
        }
    }
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::NotFound(program) => write!(f, "Daemon binary not found: {}", program),
            LaunchError::PermissionDenied(program) => {
                write!(f, "Daemon binary not executable: {}", program)
            }
            LaunchError::Spawn(e) => write!(f, "Failed to spawn daemon: {}", e),
        }
    }
}

impl std::error::Error for LaunchError {}

/// Spawn the serving daemon in the background
///
/// The daemon inherits stdout/stderr so its logs land in the same stream
/// as ours; stdin is detached.
///
/// # Returns
/// A handle to the running process. The process exists when this returns.
pub fn launch_daemon(config: &DaemonConfig) -> Result<DaemonHandle, LaunchError> {
    let program = config.program.display().to_string();
    let command_line = config.command_line();

    debug!(command = %command_line, "Spawning daemon");

    let child = Command::new(&config.program)
        .args(&config.args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| LaunchError::from_io(&program, e))?;

    // id() is only None once the child has been polled to completion
    let pid = child.id().ok_or_else(|| {
        LaunchError::Spawn(io::Error::new(
            io::ErrorKind::Other,
            "daemon exited before its pid was read",
        ))
    })?;

    info!(pid, command = %command_line, "Daemon launched");

    Ok(DaemonHandle::new(pid, command_line, child))
}

/// Suspend for a fixed `delay`, standing in for a real readiness check
///
/// Returns unconditionally after the delay. No early return.
pub async fn await_readiness(delay: Duration) {
    debug!(delay_secs = delay.as_secs_f64(), "Waiting fixed readiness delay");
    tokio::time::sleep(delay).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Instant;

    #[tokio::test]
    async fn test_launch_missing_binary() {
        let config = DaemonConfig {
            program: PathBuf::from("/nonexistent/ollama-bootstrap-test-bin"),
            args: vec![],
        };

        let err = launch_daemon(&config).unwrap_err();
        assert!(matches!(err, LaunchError::NotFound(_)));
        assert_eq!(err.exit_code(), 127);
    }

    #[tokio::test]
    async fn test_launched_daemon_is_running() {
        let config = DaemonConfig {
            program: PathBuf::from("sleep"),
            args: vec!["5".to_string()],
        };

        let mut handle = launch_daemon(&config).unwrap();
        assert!(handle.pid() > 0);
        assert!(handle.is_running());
        // Process table agrees
        assert!(nix::sys::signal::kill(nix::unistd::Pid::from_raw(handle.pid() as i32), None).is_ok());

        let exit = handle.terminate(Duration::from_secs(2)).await.unwrap();
        assert_eq!(exit.signal, Some(15));
    }

    #[tokio::test]
    async fn test_await_readiness_blocks_for_delay() {
        let delay = Duration::from_millis(80);
        let start = Instant::now();
        await_readiness(delay).await;
        assert!(start.elapsed() >= delay);
    }
}
