//! Model provisioning
//!
//! Makes sure a named model is present in the daemon's local store. Both
//! "already cached" and "freshly downloaded" count as success; the caller
//! gets the same outcome shape either way.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::client::{OllamaClient, OllamaError, PullProgress};
use crate::config::PullTransport;
use crate::metrics::{PROVISION_DURATION, PROVISION_TOTAL};

/// Error type for provisioning
#[derive(Debug)]
pub enum ProvisionError {
    /// Control API call failed
    Api(OllamaError),
    /// Pull subprocess could not be started
    Io(std::io::Error),
    /// Pull subprocess exited non-zero (None when killed by a signal)
    CommandFailed(Option<i32>),
}

impl std::fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionError::Api(e) => write!(f, "{}", e),
            ProvisionError::Io(e) => write!(f, "Failed to run pull command: {}", e),
            ProvisionError::CommandFailed(Some(code)) => {
                write!(f, "Pull command exited with code {}", code)
            }
            ProvisionError::CommandFailed(None) => write!(f, "Pull command killed by signal"),
        }
    }
}

impl std::error::Error for ProvisionError {}

impl From<OllamaError> for ProvisionError {
    fn from(e: OllamaError) -> Self {
        ProvisionError::Api(e)
    }
}

impl From<std::io::Error> for ProvisionError {
    fn from(e: std::io::Error) -> Self {
        ProvisionError::Io(e)
    }
}

/// Result of a provisioning step, reported to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// Model is present in the daemon's store
    Provisioned {
        model: String,
        transport: PullTransport,
        duration_ms: u64,
        digest: Option<String>,
    },
    /// Pull failed; the daemon keeps running
    Failed {
        model: String,
        transport: PullTransport,
        error: String,
    },
    /// Pull was not attempted
    Skipped { model: String, reason: String },
}

impl ProvisionOutcome {
    pub fn is_provisioned(&self) -> bool {
        matches!(self, ProvisionOutcome::Provisioned { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ProvisionOutcome::Failed { .. })
    }

    /// Metric label for this outcome
    pub fn label(&self) -> &'static str {
        match self {
            ProvisionOutcome::Provisioned { .. } => "provisioned",
            ProvisionOutcome::Failed { .. } => "failed",
            ProvisionOutcome::Skipped { .. } => "skipped",
        }
    }

    /// Same outcome with timing and digest stripped, for comparing runs
    pub fn without_timing(&self) -> Self {
        match self {
            ProvisionOutcome::Provisioned { model, transport, .. } => ProvisionOutcome::Provisioned {
                model: model.clone(),
                transport: *transport,
                duration_ms: 0,
                digest: None,
            },
            other => other.clone(),
        }
    }
}

/// Pulls models into the daemon's store over the configured transport
#[derive(Debug, Clone)]
pub struct ModelProvisioner {
    client: OllamaClient,
    transport: PullTransport,
    /// Serving binary, used for `pull` when the transport is `Cli`
    daemon_bin: PathBuf,
}

impl ModelProvisioner {
    pub fn new(client: OllamaClient, transport: PullTransport, daemon_bin: impl Into<PathBuf>) -> Self {
        Self {
            client,
            transport,
            daemon_bin: daemon_bin.into(),
        }
    }

    pub fn transport(&self) -> PullTransport {
        self.transport
    }

    /// Pull `name` and report the result
    ///
    /// Never returns an error: failures become `ProvisionOutcome::Failed`
    /// so the bootstrap sequence can carry on. No retry.
    pub async fn provision_model(&self, name: &str) -> ProvisionOutcome {
        let start = Instant::now();
        info!(model = name, transport = %self.transport, "Provisioning model");

        let result = match self.transport {
            PullTransport::Http => self.pull_http(name).await,
            PullTransport::Cli => self.pull_cli(name).await.map(|()| None),
        };

        let elapsed = start.elapsed();
        let outcome = match result {
            Ok(digest) => {
                info!(model = name, duration_secs = elapsed.as_secs_f64(), "Model provisioned");
                ProvisionOutcome::Provisioned {
                    model: name.to_string(),
                    transport: self.transport,
                    duration_ms: elapsed.as_millis() as u64,
                    digest,
                }
            }
            Err(e) => {
                warn!(model = name, error = %e, "Model provisioning failed");
                ProvisionOutcome::Failed {
                    model: name.to_string(),
                    transport: self.transport,
                    error: e.to_string(),
                }
            }
        };

        PROVISION_TOTAL.with_label_values(&[name, outcome.label()]).inc();
        PROVISION_DURATION
            .with_label_values(&[outcome.label()])
            .observe(elapsed.as_secs_f64());

        outcome
    }

    async fn pull_http(&self, name: &str) -> Result<Option<String>, ProvisionError> {
        let mut last_status = String::new();
        let mut last_percent = None;

        let summary = self
            .client
            .pull(name, |progress: &PullProgress| {
                let percent = progress.percent();
                // Only log status changes and 10% steps; the stream is chatty
                let step = percent.map(|p| p / 10);
                if progress.status != last_status || step != last_percent {
                    debug!(model = name, status = %progress.status, percent, "Pull progress");
                    last_status = progress.status.clone();
                    last_percent = step;
                }
            })
            .await?;

        debug!(model = name, updates = summary.updates, "Pull stream finished");
        Ok(summary.digest)
    }

    async fn pull_cli(&self, name: &str) -> Result<(), ProvisionError> {
        debug!(program = %self.daemon_bin.display(), model = name, "Running pull command");

        let status = Command::new(&self.daemon_bin)
            .arg("pull")
            .arg(name)
            .env("OLLAMA_HOST", self.client.base_url())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(ProvisionError::CommandFailed(status.code()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_daemon_reports_failure() {
        // Port 1 on loopback is never an Ollama daemon
        let provisioner = ModelProvisioner::new(
            OllamaClient::new("http://127.0.0.1:1"),
            PullTransport::Http,
            "ollama",
        );

        let outcome = provisioner.provision_model("llama3.2").await;
        assert!(outcome.is_failed());
        assert_eq!(outcome.label(), "failed");
    }

    #[tokio::test]
    async fn test_cli_transport_uses_exit_status() {
        // `true pull <model>` exits 0, `false pull <model>` exits 1
        let ok = ModelProvisioner::new(OllamaClient::new("http://127.0.0.1:1"), PullTransport::Cli, "true");
        assert!(ok.provision_model("llama3.2").await.is_provisioned());

        let failing = ModelProvisioner::new(OllamaClient::new("http://127.0.0.1:1"), PullTransport::Cli, "false");
        match failing.provision_model("llama3.2").await {
            ProvisionOutcome::Failed { error, transport, .. } => {
                assert_eq!(transport, PullTransport::Cli);
                assert_eq!(error, "Pull command exited with code 1");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let outcome = ProvisionOutcome::Failed {
            model: "llama3.2".to_string(),
            transport: PullTransport::Http,
            error: "Registry error: not found".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["transport"], "http");
        assert_eq!(json["model"], "llama3.2");
    }
}
