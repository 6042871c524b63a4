//! hotpatch server entry point.

mod app;
mod cli;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting hotpatch");

    let mut settings = config::Settings::load(cli.config.as_deref())?;
    cli.apply(&mut settings);
    tracing::info!(host = %settings.host, port = settings.port, "settings loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(cli.dir, settings, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
        }
    }))?;

    tracing::info!("hotpatch shut down cleanly");
    Ok(())
}
