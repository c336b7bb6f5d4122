//! ollama-bootstrap - container entrypoint for a local Ollama daemon
//!
//! Starts the model-serving daemon, waits until it is ready, pulls a
//! named model, then blocks for the daemon's lifetime and forwards its
//! exit status.
//!
//! # Modules
//!
//! - `config` - CLI/environment configuration
//! - `daemon` - Daemon spawn, readiness, signal forwarding, exit status
//! - `ollama` - Control API client and model provisioning
//! - `bootstrap` - The launch → readiness → provision → await sequence
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - Logging and OpenTelemetry setup
//!
//! # Quick Start
//!
//! ```ignore
//! use ollama_bootstrap::{BootstrapConfig, Bootstrapper};
//!
//! let report = Bootstrapper::new(BootstrapConfig::default()).run().await?;
//! std::process::exit(report.exit_code);
//! ```

pub mod bootstrap;
pub mod config;
pub mod daemon;
pub mod metrics;
pub mod ollama;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use bootstrap::{BootstrapError, BootstrapReport, Bootstrapper};
pub use config::{BootstrapConfig, Cli};
pub use daemon::{DaemonExit, DaemonHandle};
pub use ollama::{ModelProvisioner, ProvisionOutcome};
