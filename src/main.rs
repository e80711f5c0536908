//! endpoint-reconciler - idempotent deploys for managed inference endpoints

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use endpoint_reconciler::cli::{self, Cli, Outcome};
use endpoint_reconciler::telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        json: cli.log_json,
        ..Default::default()
    })?;

    // Ctrl-C aborts in-flight waits; the command still reports what it did
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight waits");
            on_signal.cancel();
        }
    });

    match cli::run(cli, cancel).await? {
        Outcome::Success => Ok(()),
        Outcome::Failed => {
            info!("Command finished with a failed result");
            std::process::exit(1);
        }
    }
}
