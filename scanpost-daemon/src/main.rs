use anyhow::Result;
use clap::Parser;

use scanpost_core::config::ScanpostConfig;
use scanpost_daemon::cli::DaemonCli;
use scanpost_daemon::logging;
use scanpost_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = ScanpostConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!("{} is valid", cli.config.display());
        return Ok(());
    }

    logging::init_logging(&config.general)?;
    tracing::info!(config = %cli.config.display(), "scanpost-daemon starting");

    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await
}
