use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keeper_config::ConfigLoader;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod engine;

use engine::KeeperEngine;

#[derive(Parser)]
#[command(name = "order-keeper")]
#[command(about = "Conditional swap order keeper", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/local.toml")]
	config: PathBuf,

	#[arg(long, env = "KEEPER_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the keeper service
	Start,
	/// Validate the configuration file
	Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level)?;

	match cli.command {
		Some(Commands::Start) | None => start_service(cli).await,
		Some(Commands::Validate) => validate_config(cli).await,
	}
}

async fn start_service(cli: Cli) -> Result<()> {
	info!("Starting keeper service");
	info!("Loading configuration from: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!(chain_id = config.node.chain_id, "Configuration loaded");

	let engine = KeeperEngine::new(config)
		.await
		.context("Failed to build keeper engine")?;

	engine.run().await?;

	info!("Keeper service stopped");
	Ok(())
}

async fn validate_config(cli: Cli) -> Result<()> {
	info!("Validating configuration file: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Configuration is valid");
	info!("  Chain id: {}", config.node.chain_id);
	info!("  Settlement: {}", config.contracts.settlement);
	info!("  Registry: {}", config.contracts.registry);
	info!("  Handler: {}", config.contracts.handler);
	info!("  Start block: {}", config.indexer.start_block);
	info!("  Batch size: {}", config.indexer.batch_size);
	info!("  Poll interval: {}s", config.indexer.poll_interval_secs);

	Ok(())
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();

	Ok(())
}
