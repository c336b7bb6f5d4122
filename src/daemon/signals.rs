//! Signal forwarding
//!
//! When the bootstrapper runs as a container entrypoint it receives the
//! stop signal, not the daemon. The forwarder relays termination signals
//! to the daemon pid so the daemon shuts down and we still observe and
//! forward its exit status.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Background task relaying SIGTERM, SIGINT and SIGHUP to the daemon
pub struct SignalForwarder {
    task: JoinHandle<()>,
}

impl SignalForwarder {
    /// Install signal listeners and start forwarding to `pid`
    pub fn spawn(pid: u32) -> std::io::Result<Self> {
        let mut sigterm = unix_signal(SignalKind::terminate())?;
        let mut sigint = unix_signal(SignalKind::interrupt())?;
        let mut sighup = unix_signal(SignalKind::hangup())?;
        let target = Pid::from_raw(pid as i32);

        let task = tokio::spawn(async move {
            loop {
                let sig = tokio::select! {
                    Some(()) = sigterm.recv() => Signal::SIGTERM,
                    Some(()) = sigint.recv() => Signal::SIGINT,
                    Some(()) = sighup.recv() => Signal::SIGHUP,
                    else => break,
                };

                info!(pid, signal = %sig, "Forwarding signal to daemon");
                if let Err(e) = signal::kill(target, sig) {
                    warn!(pid, signal = %sig, error = %e, "Failed to forward signal");
                }
            }
        });

        Ok(Self { task })
    }
}

impl Drop for SignalForwarder {
    fn drop(&mut self) {
        self.task.abort();
    }
}
