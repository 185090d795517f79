//! Dependency wiring for the keeper service.
//!
//! Every component is constructed exactly once at startup and passed by
//! handle; there are no lazily initialized singletons. A provider that
//! cannot be reached here fails the whole process.

use anyhow::{Context, Result};
use keeper_chain::{ChainClient, RpcChainClient};
use keeper_config::Config;
use keeper_indexer::{ChainPoller, EventDecoder, PollerConfig, Reconciler};
use keeper_orders::{BatchBuilder, BatchConfig, OrderFlow, UidCalculator};
use keeper_positions::{PositionFeed, PositionReconciler};
use keeper_storage::{MemoryOrderRepository, OrderRepository};
use keeper_types::{parse_address, parse_hash};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The assembled keeper: poller plus the order-flow service, sharing one
/// chain client and one order repository.
pub struct KeeperEngine {
	client: Arc<dyn ChainClient>,
	repo: Arc<dyn OrderRepository>,
	poller: ChainPoller,
	flow: Arc<OrderFlow>,
}

impl KeeperEngine {
	/// Builds the engine from validated configuration. Fails fast when the
	/// provider is unreachable or an address does not parse.
	pub async fn new(config: Config) -> Result<Self> {
		let settlement = parse_address(&config.contracts.settlement)
			.context("Invalid settlement address")?;
		let registry =
			parse_address(&config.contracts.registry).context("Invalid registry address")?;
		let handler =
			parse_address(&config.contracts.handler).context("Invalid handler address")?;
		let vault_relayer = parse_address(&config.contracts.vault_relayer)
			.context("Invalid vault relayer address")?;
		let fallback_handler = parse_address(&config.contracts.fallback_handler)
			.context("Invalid fallback handler address")?;
		let domain_verifier = parse_address(&config.contracts.domain_verifier)
			.context("Invalid domain verifier address")?;
		let domain_separator = parse_hash(&config.contracts.domain_separator)
			.context("Invalid domain separator")?;

		let client: Arc<dyn ChainClient> = Arc::new(
			RpcChainClient::connect(&config.node.rpc_url, config.node.chain_id)
				.await
				.context("Failed to reach node provider at startup")?,
		);

		let repo: Arc<dyn OrderRepository> = Arc::new(MemoryOrderRepository::new());
		let reconciler = Arc::new(Reconciler::new(repo.clone()));

		let poller = ChainPoller::new(
			client.clone(),
			repo.clone(),
			reconciler,
			EventDecoder::new(handler),
			settlement,
			registry,
			PollerConfig {
				start_block: config.indexer.start_block,
				batch_size: config.indexer.batch_size,
				poll_interval: Duration::from_secs(config.indexer.poll_interval_secs),
				max_range_attempts: config.indexer.max_range_attempts,
			},
		);

		let flow = Arc::new(OrderFlow::new(
			repo.clone(),
			UidCalculator::new(client.clone(), registry),
			BatchBuilder::new(
				client.clone(),
				BatchConfig {
					registry,
					vault_relayer,
					fallback_handler,
					domain_verifier,
					domain_separator,
				},
			),
			handler,
		));

		Ok(Self {
			client,
			repo,
			poller,
			flow,
		})
	}

	/// Starts the poller and blocks until a shutdown signal arrives.
	pub async fn run(&self) -> Result<()> {
		self.poller
			.start()
			.await
			.context("Failed to start chain poller")?;
		info!("Keeper running");

		shutdown_signal().await;
		info!("Shutdown signal received, stopping poller");

		self.poller.stop().await;
		Ok(())
	}

	/// Order creation/cancellation service handle.
	pub fn order_flow(&self) -> Arc<OrderFlow> {
		self.flow.clone()
	}

	/// Builds the sell-side position reconciler around an externally
	/// provided position feed.
	pub fn position_reconciler(
		&self,
		feed: Arc<dyn PositionFeed>,
		collateral: alloy::primitives::Address,
	) -> PositionReconciler {
		PositionReconciler::new(self.client.clone(), feed, self.repo.clone(), collateral)
	}
}

async fn shutdown_signal() {
	let ctrl_c = async {
		tokio::signal::ctrl_c()
			.await
			.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
