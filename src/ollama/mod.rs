//! Ollama integration module
//!
//! This module provides a client for the daemon's control API and the
//! model provisioning step built on top of it.

pub mod client;
pub mod provision;

pub use client::{LineBuffer, OllamaClient, OllamaError, PullProgress, PullSummary};
pub use provision::{ModelProvisioner, ProvisionError, ProvisionOutcome};
