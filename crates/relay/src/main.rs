use anyhow::Context;
use clap::Parser;
use clicker_relay::{cli::Cli, config::RelayConfig, logging, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	let config = RelayConfig::from_cli(&cli).context("Failed to load relay configuration")?;
	logging::init_logging(cli.verbose, config.log_filter.as_deref());

	server::serve(config).await
}
