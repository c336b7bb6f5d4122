//! Readiness probing
//!
//! Polls the daemon's control API with bounded, exponentially backed-off
//! retries instead of trusting a fixed sleep. The probe also watches the
//! daemon process so a crash during startup is noticed immediately.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::handle::{DaemonExit, DaemonHandle};
use crate::config::ProbePolicy;
use crate::metrics::READINESS_PROBES;
use crate::ollama::OllamaClient;

/// Error type for readiness probing
#[derive(Debug)]
pub enum ReadinessError {
    /// Daemon exited while we were waiting for it, after `attempts` probes
    DaemonExited { exit: DaemonExit, attempts: u32 },
    /// All probe attempts failed
    Exhausted { attempts: u32, last_error: String },
    /// Could not query the daemon process state
    Io(std::io::Error),
}

impl std::fmt::Display for ReadinessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadinessError::DaemonExited { exit, attempts } => write!(
                f,
                "Daemon exited before becoming ready ({}, after {} probes)",
                exit, attempts
            ),
            ReadinessError::Exhausted { attempts, last_error } => write!(
                f,
                "Daemon not ready after {} attempts: {}",
                attempts, last_error
            ),
            ReadinessError::Io(e) => write!(f, "Failed to query daemon process: {}", e),
        }
    }
}

impl std::error::Error for ReadinessError {}

impl From<std::io::Error> for ReadinessError {
    fn from(e: std::io::Error) -> Self {
        ReadinessError::Io(e)
    }
}

/// Successful probe result
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSuccess {
    /// Number of attempts including the successful one
    pub attempts: u32,
    /// Daemon version reported by the control API
    pub version: String,
    pub waited: Duration,
}

/// Exponential backoff capped at a maximum delay
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }
}

/// Poll the control API until it answers or the policy is exhausted
pub async fn wait_until_ready(
    client: &OllamaClient,
    handle: &mut DaemonHandle,
    policy: &ProbePolicy,
) -> Result<ProbeSuccess, ReadinessError> {
    let start = Instant::now();
    let mut backoff = Backoff::new(policy.initial_backoff, policy.max_backoff);
    let mut last_error = String::new();

    for attempt in 1..=policy.max_attempts {
        if let Some(exit) = handle.try_exit()? {
            READINESS_PROBES.with_label_values(&["daemon_exited"]).inc();
            return Err(ReadinessError::DaemonExited {
                exit,
                attempts: attempt - 1,
            });
        }

        match client.version(policy.request_timeout).await {
            Ok(version) => {
                READINESS_PROBES.with_label_values(&["ready"]).inc();
                let waited = start.elapsed();
                info!(attempt, %version, waited_ms = waited.as_millis() as u64, "Daemon ready");
                return Ok(ProbeSuccess {
                    attempts: attempt,
                    version,
                    waited,
                });
            }
            Err(e) => {
                READINESS_PROBES.with_label_values(&["not_ready"]).inc();
                debug!(attempt, max_attempts = policy.max_attempts, error = %e, "Daemon not ready yet");
                last_error = e.to_string();
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(backoff.next_delay()).await;
        }
    }

    // One last look so a crash is not misreported as a timeout
    if let Some(exit) = handle.try_exit()? {
        return Err(ReadinessError::DaemonExited {
            exit,
            attempts: policy.max_attempts,
        });
    }

    warn!(
        attempts = policy.max_attempts,
        waited_ms = start.elapsed().as_millis() as u64,
        error = %last_error,
        "Readiness probe exhausted"
    );
    Err(ReadinessError::Exhausted {
        attempts: policy.max_attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_initial_above_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
