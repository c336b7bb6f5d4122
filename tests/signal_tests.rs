//! Container stop signal tests
//!
//! These tests send SIGTERM to the test process itself, so they live in
//! their own binary: every forwarder in the process relays the signal, and
//! daemons started by unrelated tests would be stopped too. Tests here
//! hold `SIGNAL_LOCK` so they never overlap.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::getpid;

use ollama_bootstrap::config::{DaemonConfig, ProbePolicy, ProvisionFailurePolicy, ReadinessStrategy};
use ollama_bootstrap::ollama::ProvisionOutcome;
use ollama_bootstrap::{BootstrapConfig, Bootstrapper};

static SIGNAL_LOCK: Mutex<()> = Mutex::new(());

/// Wait until the metrics file appears (written right after provisioning),
/// then deliver SIGTERM to ourselves
async fn stop_after_provisioning(metrics_path: &Path, deadline: Duration) {
    let start = tokio::time::Instant::now();
    while !metrics_path.exists() {
        assert!(start.elapsed() < deadline, "provisioning did not finish in time");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    kill(getpid(), Signal::SIGTERM).unwrap();
}

/// `docker stop` reaches the daemon and its own exit code is forwarded
#[tokio::test]
async fn test_sigterm_is_forwarded_to_daemon() {
    let _guard = SIGNAL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let metrics_path = dir.path().join("bootstrap.prom");

    let config = BootstrapConfig {
        daemon: DaemonConfig {
            program: PathBuf::from("sh"),
            args: vec![
                "-c".to_string(),
                "trap 'exit 0' TERM; while :; do sleep 0.05; done".to_string(),
            ],
        },
        base_url: "http://127.0.0.1:1".to_string(),
        readiness: ReadinessStrategy::FixedDelay(Duration::from_millis(10)),
        on_provision_failure: ProvisionFailurePolicy::Continue,
        metrics_path: Some(metrics_path.clone()),
        ..BootstrapConfig::default()
    };

    let bootstrapper = Bootstrapper::new(config);
    let (result, ()) = tokio::join!(
        bootstrapper.run(),
        stop_after_provisioning(&metrics_path, Duration::from_secs(10))
    );
    let report = result.unwrap();

    assert!(!report.aborted);
    assert_eq!(report.daemon_exit.code, Some(0));
    assert_eq!(report.daemon_exit.signal, None);
    assert_eq!(report.exit_code, 0);
}

// Integration tests that require external services

/// Full run against a real Ollama install, stopped like a container
#[tokio::test]
#[ignore = "Requires the ollama binary and network access"]
async fn test_real_ollama_bootstrap() {
    let _guard = SIGNAL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let metrics_path = dir.path().join("bootstrap.prom");

    let config = BootstrapConfig {
        daemon: DaemonConfig::default(),
        readiness: ReadinessStrategy::Probe(ProbePolicy::default()),
        metrics_path: Some(metrics_path.clone()),
        ..BootstrapConfig::default()
    };

    let bootstrapper = Bootstrapper::new(config);
    let (result, ()) = tokio::join!(
        bootstrapper.run(),
        stop_after_provisioning(&metrics_path, Duration::from_secs(1800))
    );
    let report = result.unwrap();

    assert!(report.readiness.ready);
    assert!(
        matches!(report.provision, ProvisionOutcome::Provisioned { .. }),
        "unexpected outcome: {:?}",
        report.provision
    );
    // ollama serve shuts down cleanly on SIGTERM
    assert_eq!(report.exit_code, 0);
}
