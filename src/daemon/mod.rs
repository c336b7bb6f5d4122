//! Model-serving daemon management
//!
//! This module provides the process side of the bootstrap:
//! - Spawning the daemon (`lifecycle`)
//! - Tracking its state and exit status (`handle`)
//! - Waiting for readiness, fixed or probed (`lifecycle`, `readiness`)
//! - Relaying stop signals to it (`signals`)

pub mod handle;
pub mod lifecycle;
pub mod readiness;
pub mod signals;

pub use handle::{DaemonExit, DaemonHandle, DaemonStatus};
pub use lifecycle::{await_readiness, launch_daemon, LaunchError};
pub use readiness::{wait_until_ready, Backoff, ProbeSuccess, ReadinessError};
pub use signals::SignalForwarder;
