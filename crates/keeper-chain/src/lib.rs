//! Node provider access for the keeper system.
//!
//! This module defines the `ChainClient` trait consumed by the poller, the
//! hash calculator, and the batch builder, together with the alloy HTTP
//! implementation. Components take the trait object so tests can drive them
//! with an in-process mock.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod rpc;
}

pub use implementations::rpc::RpcChainClient;

/// Errors that can occur during node provider operations.
#[derive(Debug, Error)]
pub enum ChainError {
	/// The provider could not be reached or (re)created.
	#[error("Connection error: {0}")]
	Connection(String),
	/// A request reached the provider but failed.
	#[error("RPC error: {0}")]
	Rpc(String),
}

/// Read-only access to an Ethereum node.
///
/// This is the complete provider surface the core needs: block-range log
/// queries, `eth_call` for derived hashes and token reads, storage reads for
/// wallet introspection, and gas estimation for batch building.
#[async_trait]
pub trait ChainClient: Send + Sync {
	/// Chain id this client is configured for.
	fn chain_id(&self) -> u64;

	/// Current chain head.
	async fn block_number(&self) -> Result<u64, ChainError>;

	/// Logs matching the given filter.
	async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError>;

	/// `eth_call` against `to` with the given calldata.
	async fn call(&self, to: Address, data: Vec<u8>) -> Result<Bytes, ChainError>;

	/// Raw storage word at `slot` of `address`.
	async fn storage_at(&self, address: Address, slot: U256) -> Result<B256, ChainError>;

	/// Gas estimate for a call from `from` to `to` with the given calldata.
	async fn estimate_gas(
		&self,
		from: Address,
		to: Address,
		data: Vec<u8>,
	) -> Result<u64, ChainError>;

	/// Tears down and recreates the underlying connection. Used by the
	/// poller after provider-level failures.
	async fn reconnect(&self) -> Result<(), ChainError>;
}
