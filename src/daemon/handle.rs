//! Daemon Handle - the serving process owned by the bootstrapper
//!
//! Each DaemonHandle tracks one daemon process throughout its lifecycle:
//! Starting -> Ready -> Serving -> Exited

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use tokio::process::Child;
use tracing::{debug, info, warn};

/// Status of the daemon process
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonStatus {
    /// Process spawned, readiness not yet established
    Starting,
    /// Control API answered (or the fixed delay elapsed)
    Ready,
    /// Bootstrap sequence finished, waiting on the daemon
    Serving,
    /// Process has exited
    Exited(DaemonExit),
}

/// Terminal state of the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DaemonExit {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed
    pub signal: Option<i32>,
}

impl DaemonExit {
    /// Exit code the bootstrapper should report for this exit
    ///
    /// Follows the shell convention: `128 + n` when killed by signal `n`.
    pub fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(sig)) => 128 + sig,
            (None, None) => 1,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code() == 0
    }
}

impl From<ExitStatus> for DaemonExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl std::fmt::Display for DaemonExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(sig)) => match Signal::try_from(sig) {
                Ok(s) => write!(f, "killed by {}", s),
                Err(_) => write!(f, "killed by signal {}", sig),
            },
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Represents the spawned daemon process
pub struct DaemonHandle {
    /// Process ID captured at spawn time
    pid: u32,
    /// Command line the daemon was started with
    command_line: String,
    /// Tokio child process
    child: Child,
    /// Current status of the daemon
    pub status: DaemonStatus,
    /// When the daemon was launched
    launched_at: Instant,
}

impl DaemonHandle {
    pub(crate) fn new(pid: u32, command_line: String, child: Child) -> Self {
        Self {
            pid,
            command_line,
            child,
            status: DaemonStatus::Starting,
            launched_at: Instant::now(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Time since the daemon was launched
    pub fn uptime(&self) -> Duration {
        self.launched_at.elapsed()
    }

    pub fn mark_ready(&mut self) {
        if matches!(self.status, DaemonStatus::Starting) {
            self.status = DaemonStatus::Ready;
        }
    }

    pub fn mark_serving(&mut self) {
        if !matches!(self.status, DaemonStatus::Exited(_)) {
            self.status = DaemonStatus::Serving;
        }
    }

    /// Non-blocking check for an exit that already happened
    pub fn try_exit(&mut self) -> std::io::Result<Option<DaemonExit>> {
        if let DaemonStatus::Exited(exit) = self.status {
            return Ok(Some(exit));
        }
        match self.child.try_wait()? {
            Some(status) => {
                let exit = DaemonExit::from(status);
                self.status = DaemonStatus::Exited(exit);
                Ok(Some(exit))
            }
            None => Ok(None),
        }
    }

    /// Whether the daemon process is still alive
    pub fn is_running(&mut self) -> bool {
        matches!(self.try_exit(), Ok(None))
    }

    /// Block until the daemon exits and return its terminal state
    pub async fn await_completion(&mut self) -> std::io::Result<DaemonExit> {
        if let DaemonStatus::Exited(exit) = self.status {
            return Ok(exit);
        }
        let status = self.child.wait().await?;
        let exit = DaemonExit::from(status);
        self.status = DaemonStatus::Exited(exit);
        info!(pid = self.pid, %exit, uptime_secs = self.uptime().as_secs_f64(), "Daemon exited");
        Ok(exit)
    }

    /// Send a signal to the daemon process
    pub fn signal(&self, sig: Signal) -> nix::Result<()> {
        signal::kill(Pid::from_raw(self.pid as i32), sig)
    }

    /// Graceful stop: SIGTERM, wait up to `grace`, then SIGKILL
    pub async fn terminate(&mut self, grace: Duration) -> std::io::Result<DaemonExit> {
        if let Some(exit) = self.try_exit()? {
            return Ok(exit);
        }

        debug!(pid = self.pid, "Sending SIGTERM to daemon");
        if let Err(e) = self.signal(Signal::SIGTERM) {
            // Process might already be dead
            warn!(pid = self.pid, error = %e, "Failed to send SIGTERM to daemon");
        }

        match tokio::time::timeout(grace, self.await_completion()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(pid = self.pid, grace_secs = grace.as_secs_f64(), "Daemon ignored SIGTERM, killing");
                self.child.start_kill()?;
                self.await_completion().await
            }
        }
    }
}

impl std::fmt::Debug for DaemonHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonHandle")
            .field("pid", &self.pid)
            .field("command_line", &self.command_line)
            .field("status", &self.status)
            .field("uptime", &self.uptime())
            .finish()
    }
}
