use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use admission_guard::{init_logging, AdmissionController, MaintenanceScheduler, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    init_logging();
    tracing::info!("Starting admission engine...");

    // Load configuration
    let settings = Settings::load().context("failed to load settings")?;
    tracing::info!(
        rules = settings.rules.len(),
        fail_open = settings.protection.fail_open,
        "Configuration loaded successfully"
    );

    if settings.metrics.enabled {
        let addr = settings
            .metrics
            .install_exporter()
            .context("failed to install Prometheus exporter")?;
        tracing::info!(address = %addr, "Metrics exporter listening");
    }

    let controller = Arc::new(settings.build_controller()?);
    let maintenance = MaintenanceScheduler::new(controller.clone()).start();

    tracing::info!("Admission engine ready; reading `identity endpoint` lines from stdin");
    let result = serve_stdin(&controller).await;

    maintenance.shutdown().await;
    tracing::info!(stats = ?controller.get_protection_stats(), "Admission engine stopped");
    result
}

/// Answer one JSON decision per input line until EOF or Ctrl-C
async fn serve_stdin(controller: &AdmissionController) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                return Ok(());
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    tracing::info!("Input closed");
                    return Ok(());
                };
                let mut parts = line.split_whitespace();
                let Some(identity) = parts.next() else {
                    continue;
                };
                let endpoint = parts.next().unwrap_or("/");

                let decision = controller.check_request(identity, endpoint);
                println!("{}", serde_json::to_string(&decision)?);
            }
        }
    }
}
