//! Prometheus metrics for the bootstrap sequence
//!
//! The bootstrapper is short-lived apart from waiting on the daemon, so
//! there is no scrape endpoint. Metrics can be written to a file in the
//! text exposition format for node-exporter's textfile collector.

use std::path::Path;

use lazy_static::lazy_static;
use tokio::io::AsyncWriteExt;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    /// Duration of each bootstrap step (launch, readiness, provision, serve)
    pub static ref STEP_DURATION: HistogramVec = register_histogram_vec!(
        "bootstrap_step_duration_seconds",
        "Duration of each bootstrap step",
        &["step"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 1800.0, 7200.0]
    ).expect("failed to register STEP_DURATION metric");

    /// Readiness probe attempts by result
    pub static ref READINESS_PROBES: CounterVec = register_counter_vec!(
        "bootstrap_readiness_probes_total",
        "Readiness probe attempts",
        &["result"] // ready, not_ready, daemon_exited
    ).expect("failed to register READINESS_PROBES metric");

    /// Provisioning attempts by model and outcome
    pub static ref PROVISION_TOTAL: CounterVec = register_counter_vec!(
        "bootstrap_provision_total",
        "Model provisioning attempts",
        &["model", "outcome"]
    ).expect("failed to register PROVISION_TOTAL metric");

    /// Provisioning duration by outcome
    pub static ref PROVISION_DURATION: HistogramVec = register_histogram_vec!(
        "bootstrap_provision_duration_seconds",
        "Time spent pulling the model",
        &["outcome"],
        vec![0.1, 1.0, 10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]
    ).expect("failed to register PROVISION_DURATION metric");

    /// 1 while the daemon process is alive
    pub static ref DAEMON_UP: Gauge = register_gauge!(
        "bootstrap_daemon_up",
        "Whether the daemon process is running"
    ).expect("failed to register DAEMON_UP metric");

    /// Exit code forwarded from the daemon
    pub static ref DAEMON_EXIT_CODE: Gauge = register_gauge!(
        "bootstrap_daemon_exit_code",
        "Exit code reported for the daemon"
    ).expect("failed to register DAEMON_EXIT_CODE metric");
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Write metrics to `path`, replacing it atomically
///
/// Writes to a sibling temp file first so a collector never reads a
/// half-written file.
pub async fn write_textfile(path: &Path) -> std::io::Result<()> {
    let text = gather_text().map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(text.as_bytes()).await?;
    file.sync_all().await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_bootstrap_metrics() {
        DAEMON_UP.set(1.0);
        STEP_DURATION.with_label_values(&["launch"]).observe(0.02);

        let text = gather_text().unwrap();
        assert!(text.contains("bootstrap_daemon_up"));
        assert!(text.contains("bootstrap_step_duration_seconds_bucket{step=\"launch\""));
    }

    #[tokio::test]
    async fn test_write_textfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bootstrap.prom");
        DAEMON_EXIT_CODE.set(0.0);

        write_textfile(&path).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("bootstrap_daemon_exit_code"));
        assert!(!dir.path().join("bootstrap.prom.tmp").exists());
    }
}
