use clap::Parser;
use tracing::{error, info};

use aurasign_worker::{Cli, run, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    aurasign_observability::init_with(cli.log_format);

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return Err(err.into());
        }
    };
    info!(
        stage = %config.stage,
        language = ?config.language,
        processing_budget_ms = config.processing_budget.as_millis() as u64,
        "worker configured"
    );

    let stats = run(config, shutdown_signal()).await?;
    info!(
        connect_attempts = stats.connect_attempts,
        sessions_started = stats.sessions_started,
        session_failures = stats.session_failures,
        started_at = %stats.started_at,
        "worker stopped"
    );
    Ok(())
}
