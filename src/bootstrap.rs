//! Bootstrap sequence
//!
//! Strict order, no rollback:
//!
//! ```text
//! launch_daemon ──► readiness (fixed delay | probe) ──► provision_model
//!                                                            │
//!                     exit code ◄── await_completion ◄───────┘
//! ```
//!
//! A launch failure ends the run before anything else happens. A failed
//! pull is reported in the `BootstrapReport` and, under the default
//! policy, the daemon keeps serving and is still awaited.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{BootstrapConfig, ProvisionFailurePolicy, ReadinessStrategy};
use crate::daemon::{
    await_readiness, launch_daemon, wait_until_ready, DaemonExit, DaemonHandle, LaunchError,
    ReadinessError, SignalForwarder,
};
use crate::metrics::{DAEMON_EXIT_CODE, DAEMON_UP, STEP_DURATION};
use crate::ollama::{ModelProvisioner, OllamaClient, ProvisionOutcome};

/// Exit code used when provisioning failed under the `abort` policy
pub const ABORT_EXIT_CODE: i32 = 1;

/// Error type for a bootstrap run
#[derive(Debug)]
pub enum BootstrapError {
    /// The daemon could not be started; nothing else was attempted
    Launch(LaunchError),
    /// Waiting on the daemon failed
    Wait(std::io::Error),
}

impl BootstrapError {
    /// Exit code the bootstrapper should terminate with
    pub fn exit_code(&self) -> i32 {
        match self {
            BootstrapError::Launch(e) => e.exit_code(),
            BootstrapError::Wait(_) => 1,
        }
    }
}

impl std::fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapError::Launch(e) => write!(f, "{}", e),
            BootstrapError::Wait(e) => write!(f, "Failed to wait for daemon: {}", e),
        }
    }
}

impl std::error::Error for BootstrapError {}

impl From<LaunchError> for BootstrapError {
    fn from(e: LaunchError) -> Self {
        BootstrapError::Launch(e)
    }
}

/// How the readiness step went
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadinessOutcome {
    /// "fixed" or "probe"
    pub strategy: &'static str,
    /// Whether readiness was confirmed (always true for a fixed delay)
    pub ready: bool,
    /// Probe attempts made (0 for a fixed delay)
    pub attempts: u32,
    pub waited_ms: u64,
    /// Reason readiness was not confirmed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structured result of a bootstrap run
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    /// Unique ID for this run (UUID v7, time-sortable)
    pub run_id: Uuid,
    pub model: String,
    pub daemon_pid: u32,
    pub readiness: ReadinessOutcome,
    pub provision: ProvisionOutcome,
    pub daemon_exit: DaemonExit,
    /// Daemon was stopped because provisioning failed under `abort`
    pub aborted: bool,
    /// Exit code the bootstrapper terminates with
    pub exit_code: i32,
}

impl BootstrapReport {
    /// Write the report as pretty JSON
    pub async fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(path, json).await
    }
}

/// Runs the launch → readiness → provision → await sequence
pub struct Bootstrapper {
    config: BootstrapConfig,
    client: OllamaClient,
    provisioner: ModelProvisioner,
}

impl Bootstrapper {
    pub fn new(config: BootstrapConfig) -> Self {
        let client = OllamaClient::new(config.base_url.clone());
        let provisioner = ModelProvisioner::new(
            client.clone(),
            config.pull_transport,
            config.daemon.program.clone(),
        );

        Self {
            config,
            client,
            provisioner,
        }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Run the whole sequence and return once the daemon has exited
    pub async fn run(&self) -> Result<BootstrapReport, BootstrapError> {
        let run_id = Uuid::now_v7();
        let span = info_span!(
            "bootstrap",
            run_id = %run_id,
            model = %self.config.model,
            otel.name = "bootstrap"
        );

        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<BootstrapReport, BootstrapError> {
        info!(command = %self.config.daemon.command_line(), model = %self.config.model, "Starting bootstrap");

        // 1. Launch
        let step = Instant::now();
        let mut handle = match launch_daemon(&self.config.daemon) {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "Daemon launch failed, not provisioning");
                return Err(e.into());
            }
        };
        STEP_DURATION.with_label_values(&["launch"]).observe(step.elapsed().as_secs_f64());
        DAEMON_UP.set(1.0);

        // Relay container stop signals for the rest of the run
        let _forwarder = match SignalForwarder::spawn(handle.pid()) {
            Ok(forwarder) => Some(forwarder),
            Err(e) => {
                warn!(error = %e, "Signal forwarding unavailable");
                None
            }
        };

        // 2. Readiness
        let step = Instant::now();
        let (readiness, early_exit) = self.establish_readiness(&mut handle).await;
        STEP_DURATION.with_label_values(&["readiness"]).observe(step.elapsed().as_secs_f64());

        // 3. Provision
        let step = Instant::now();
        let provision = match early_exit {
            Some(exit) => ProvisionOutcome::Skipped {
                model: self.config.model.clone(),
                reason: format!("daemon exited before provisioning ({})", exit),
            },
            None => self.provisioner.provision_model(&self.config.model).await,
        };
        STEP_DURATION.with_label_values(&["provision"]).observe(step.elapsed().as_secs_f64());
        self.export_metrics().await;

        // 4. Await completion (or stop the daemon under the abort policy)
        let aborted = provision.is_failed()
            && self.config.on_provision_failure == ProvisionFailurePolicy::Abort;

        let step = Instant::now();
        let waited = if aborted {
            warn!(grace_secs = self.config.shutdown_grace.as_secs_f64(), "Provisioning failed, stopping daemon");
            handle.terminate(self.config.shutdown_grace).await
        } else {
            handle.mark_serving();
            info!(pid = handle.pid(), "Bootstrap complete, waiting on daemon");
            handle.await_completion().await
        };
        let daemon_exit = waited.map_err(BootstrapError::Wait)?;
        STEP_DURATION.with_label_values(&["serve"]).observe(step.elapsed().as_secs_f64());

        let exit_code = if aborted {
            ABORT_EXIT_CODE
        } else {
            daemon_exit.exit_code()
        };

        DAEMON_UP.set(0.0);
        DAEMON_EXIT_CODE.set(f64::from(daemon_exit.exit_code()));
        self.export_metrics().await;

        let report = BootstrapReport {
            run_id,
            model: self.config.model.clone(),
            daemon_pid: handle.pid(),
            readiness,
            provision,
            daemon_exit,
            aborted,
            exit_code,
        };

        info!(
            provision = report.provision.label(),
            daemon_exit = %report.daemon_exit,
            exit_code = report.exit_code,
            aborted = report.aborted,
            "Bootstrap finished"
        );

        if let Some(path) = &self.config.report_path {
            if let Err(e) = report.write_json(path).await {
                warn!(path = %path.display(), error = %e, "Failed to write report");
            }
        }

        Ok(report)
    }

    /// Readiness step; returns the daemon exit if it died while we waited
    async fn establish_readiness(
        &self,
        handle: &mut DaemonHandle,
    ) -> (ReadinessOutcome, Option<DaemonExit>) {
        let strategy = self.config.readiness.name();

        match &self.config.readiness {
            ReadinessStrategy::FixedDelay(delay) => {
                await_readiness(*delay).await;
                handle.mark_ready();
                (
                    ReadinessOutcome {
                        strategy,
                        ready: true,
                        attempts: 0,
                        waited_ms: duration_ms(*delay),
                        error: None,
                    },
                    None,
                )
            }
            ReadinessStrategy::Probe(policy) => {
                let start = Instant::now();
                match wait_until_ready(&self.client, handle, policy).await {
                    Ok(success) => {
                        handle.mark_ready();
                        (
                            ReadinessOutcome {
                                strategy,
                                ready: true,
                                attempts: success.attempts,
                                waited_ms: duration_ms(success.waited),
                                error: None,
                            },
                            None,
                        )
                    }
                    Err(e) => {
                        let (attempts, early_exit) = match &e {
                            ReadinessError::DaemonExited { exit, attempts } => (*attempts, Some(*exit)),
                            ReadinessError::Exhausted { attempts, .. } => (*attempts, None),
                            ReadinessError::Io(_) => (0, None),
                        };
                        // Proceed anyway: the pull will report whatever is wrong
                        warn!(error = %e, "Readiness not confirmed");
                        (
                            ReadinessOutcome {
                                strategy,
                                ready: false,
                                attempts,
                                waited_ms: duration_ms(start.elapsed()),
                                error: Some(e.to_string()),
                            },
                            early_exit,
                        )
                    }
                }
            }
        }
    }

    async fn export_metrics(&self) {
        if let Some(path) = &self.config.metrics_path {
            if let Err(e) = crate::metrics::write_textfile(path).await {
                warn!(path = %path.display(), error = %e, "Failed to write metrics file");
            }
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DaemonConfig, PullTransport};
    use std::path::PathBuf;

    fn sh_daemon(script: &str) -> DaemonConfig {
        DaemonConfig {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[test]
    fn test_launch_error_exit_code() {
        let err = BootstrapError::Launch(LaunchError::NotFound("ollama".to_string()));
        assert_eq!(err.exit_code(), 127);
        assert_eq!(err.to_string(), "Daemon binary not found: ollama");
    }

    #[tokio::test]
    async fn test_probe_skips_provisioning_when_daemon_dies() {
        let config = BootstrapConfig {
            daemon: sh_daemon("sleep 0.5; exit 4"),
            base_url: "http://127.0.0.1:1".to_string(),
            readiness: ReadinessStrategy::Probe(crate::config::ProbePolicy {
                max_attempts: 50,
                initial_backoff: Duration::from_millis(20),
                max_backoff: Duration::from_millis(50),
                request_timeout: Duration::from_millis(200),
            }),
            ..BootstrapConfig::default()
        };

        let report = Bootstrapper::new(config).run().await.unwrap();

        assert!(!report.readiness.ready);
        // Probes kept running until the daemon died
        assert!(report.readiness.attempts > 0);
        assert!(report.readiness.attempts < 50);
        assert!(matches!(report.provision, ProvisionOutcome::Skipped { .. }));
        assert_eq!(report.exit_code, 4);
    }

    #[tokio::test]
    async fn test_abort_policy_stops_daemon() {
        let config = BootstrapConfig {
            daemon: sh_daemon("sleep 30"),
            base_url: "http://127.0.0.1:1".to_string(),
            readiness: ReadinessStrategy::FixedDelay(Duration::from_millis(10)),
            pull_transport: PullTransport::Http,
            on_provision_failure: ProvisionFailurePolicy::Abort,
            shutdown_grace: Duration::from_secs(2),
            ..BootstrapConfig::default()
        };

        let start = Instant::now();
        let report = Bootstrapper::new(config).run().await.unwrap();

        assert!(report.aborted);
        assert!(report.provision.is_failed());
        assert_eq!(report.exit_code, ABORT_EXIT_CODE);
        assert!(start.elapsed() < Duration::from_secs(20));
    }
}
