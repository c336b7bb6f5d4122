use clap::Parser;

use ollama_bootstrap::tracing::{init_tracing, shutdown_tracing};
use ollama_bootstrap::{BootstrapConfig, Bootstrapper, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing("ollama-bootstrap", cli.log_format, cli.otlp_endpoint.as_deref()) {
        eprintln!("[WARN] Failed to initialize tracing: {}", e);
    }

    let config = BootstrapConfig::from(&cli);
    let exit_code = match Bootstrapper::new(config).run().await {
        Ok(report) => report.exit_code,
        Err(e) => {
            tracing::error!(error = %e, "Bootstrap failed");
            e.exit_code()
        }
    };

    shutdown_tracing();
    std::process::exit(exit_code);
}
