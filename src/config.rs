//! Bootstrap configuration
//!
//! `Cli` is the command-line/environment surface parsed by `clap`.
//! `BootstrapConfig` is the plain runtime configuration the rest of the
//! crate consumes, so library users and tests never need to go through
//! argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;

/// Default Ollama control API address
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default model pulled at startup
pub const DEFAULT_MODEL: &str = "llama3.2";

/// How the bootstrapper decides the daemon is ready for provisioning
#[derive(Debug, Clone, PartialEq)]
pub enum ReadinessStrategy {
    /// Sleep for a fixed duration and assume the daemon is up
    FixedDelay(Duration),
    /// Poll the control API until it answers
    Probe(ProbePolicy),
}

impl ReadinessStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ReadinessStrategy::FixedDelay(_) => "fixed",
            ReadinessStrategy::Probe(_) => "probe",
        }
    }
}

/// Bounded retry policy for readiness probing
#[derive(Debug, Clone, PartialEq)]
pub struct ProbePolicy {
    /// Maximum number of probe attempts
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
    /// Upper bound for the delay between attempts
    pub max_backoff: Duration,
    /// Per-request timeout for a single probe
    pub request_timeout: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(2000),
            request_timeout: Duration::from_millis(2000),
        }
    }
}

/// Transport used to pull the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PullTransport {
    /// `POST /api/pull` against the daemon's control API
    Http,
    /// `<daemon-bin> pull <model>` subprocess
    Cli,
}

impl std::fmt::Display for PullTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PullTransport::Http => write!(f, "http"),
            PullTransport::Cli => write!(f, "cli"),
        }
    }
}

/// What to do when provisioning fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProvisionFailurePolicy {
    /// Report the failure and keep serving
    Continue,
    /// Stop the daemon and exit non-zero
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReadinessMode {
    Fixed,
    Probe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Process-level settings for launching the daemon
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    /// Path or name of the serving binary
    pub program: PathBuf,
    /// Arguments passed to the serving binary
    pub args: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ollama"),
            args: vec!["serve".to_string()],
        }
    }
}

impl DaemonConfig {
    /// Human readable command line, for logs
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Runtime configuration for a bootstrap run
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub daemon: DaemonConfig,
    /// Model to provision (e.g., "llama3.2")
    pub model: String,
    /// Base URL of the daemon's control API
    pub base_url: String,
    pub readiness: ReadinessStrategy,
    pub pull_transport: PullTransport,
    pub on_provision_failure: ProvisionFailurePolicy,
    /// Time given to the daemon between SIGTERM and SIGKILL on abort
    pub shutdown_grace: Duration,
    /// Where to write the JSON report, if anywhere
    pub report_path: Option<PathBuf>,
    /// Where to write Prometheus text metrics, if anywhere
    pub metrics_path: Option<PathBuf>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            readiness: ReadinessStrategy::Probe(ProbePolicy::default()),
            pull_transport: PullTransport::Http,
            on_provision_failure: ProvisionFailurePolicy::Continue,
            shutdown_grace: Duration::from_secs(10),
            report_path: None,
            metrics_path: None,
        }
    }
}

/// Start a local Ollama daemon, pull a model, then serve until the daemon exits
#[derive(Debug, Parser)]
#[command(name = "ollama-bootstrap", version)]
pub struct Cli {
    /// Serving binary to launch
    #[arg(long, env = "OLLAMA_BIN", default_value = "ollama")]
    pub daemon_bin: PathBuf,

    /// Argument for the serving binary (repeatable)
    #[arg(long = "daemon-arg", default_values_t = vec!["serve".to_string()], allow_hyphen_values = true)]
    pub daemon_args: Vec<String>,

    /// Model to pull once the daemon is ready
    #[arg(long, env = "OLLAMA_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Base URL of the daemon's control API
    #[arg(long, env = "OLLAMA_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Readiness strategy
    #[arg(long, env = "BOOTSTRAP_READINESS", value_enum, default_value_t = ReadinessMode::Probe)]
    pub readiness: ReadinessMode,

    /// Delay used by the fixed readiness strategy
    #[arg(long, default_value_t = 5)]
    pub readiness_delay_secs: u64,

    #[arg(long, default_value_t = 30)]
    pub probe_attempts: u32,

    #[arg(long, default_value_t = 100)]
    pub probe_initial_backoff_ms: u64,

    #[arg(long, default_value_t = 2000)]
    pub probe_max_backoff_ms: u64,

    #[arg(long, default_value_t = 2000)]
    pub probe_timeout_ms: u64,

    /// How the model is pulled
    #[arg(long, env = "BOOTSTRAP_PULL_VIA", value_enum, default_value_t = PullTransport::Http)]
    pub pull_via: PullTransport,

    /// Whether a failed pull stops the daemon
    #[arg(long, env = "BOOTSTRAP_ON_PROVISION_FAILURE", value_enum, default_value_t = ProvisionFailurePolicy::Continue)]
    pub on_provision_failure: ProvisionFailurePolicy,

    /// Grace period between SIGTERM and SIGKILL when stopping the daemon
    #[arg(long, default_value_t = 10)]
    pub shutdown_grace_secs: u64,

    /// Write the final report as JSON to this path
    #[arg(long)]
    pub report_path: Option<PathBuf>,

    /// Write Prometheus text metrics to this path
    #[arg(long)]
    pub metrics_path: Option<PathBuf>,

    #[arg(long, env = "BOOTSTRAP_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// OTLP collector endpoint; tracing export is disabled when unset
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

impl From<&Cli> for BootstrapConfig {
    fn from(cli: &Cli) -> Self {
        let readiness = match cli.readiness {
            ReadinessMode::Fixed => {
                ReadinessStrategy::FixedDelay(Duration::from_secs(cli.readiness_delay_secs))
            }
            ReadinessMode::Probe => ReadinessStrategy::Probe(ProbePolicy {
                max_attempts: cli.probe_attempts.max(1),
                initial_backoff: Duration::from_millis(cli.probe_initial_backoff_ms),
                max_backoff: Duration::from_millis(cli.probe_max_backoff_ms),
                request_timeout: Duration::from_millis(cli.probe_timeout_ms),
            }),
        };

        Self {
            daemon: DaemonConfig {
                program: cli.daemon_bin.clone(),
                args: cli.daemon_args.clone(),
            },
            model: cli.model.clone(),
            base_url: cli.base_url.clone(),
            readiness,
            pull_transport: cli.pull_via,
            on_provision_failure: cli.on_provision_failure,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
            report_path: cli.report_path.clone(),
            metrics_path: cli.metrics_path.clone(),
        }
    }
}
