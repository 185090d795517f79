//! HTTP JSON-RPC implementation of the chain client using the Alloy
//! library.

use crate::{ChainClient, ChainError};
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{Filter, Log, TransactionInput, TransactionRequest};
use alloy::transports::http::Http;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

type HttpProvider = RootProvider<Http<reqwest::Client>>;

/// Chain client backed by an Alloy HTTP provider.
///
/// The provider handle sits behind a lock so `reconnect` can swap it out
/// after provider-level failures without interrupting other holders of the
/// client.
pub struct RpcChainClient {
	rpc_url: String,
	chain_id: u64,
	provider: RwLock<HttpProvider>,
}

impl RpcChainClient {
	/// Connects to the node and verifies it is reachable.
	///
	/// Reachability is checked eagerly with a block-number call so a
	/// misconfigured endpoint fails at startup rather than on first use.
	pub async fn connect(rpc_url: &str, chain_id: u64) -> Result<Self, ChainError> {
		let provider = build_provider(rpc_url)?;

		let head = provider
			.get_block_number()
			.await
			.map_err(|e| ChainError::Connection(format!("Failed to reach provider: {}", e)))?;

		info!(chain_id, head, "Connected to node provider");

		Ok(Self {
			rpc_url: rpc_url.to_string(),
			chain_id,
			provider: RwLock::new(provider),
		})
	}
}

fn build_provider(rpc_url: &str) -> Result<HttpProvider, ChainError> {
	let url = rpc_url
		.parse()
		.map_err(|e| ChainError::Connection(format!("Invalid RPC URL: {}", e)))?;
	Ok(RootProvider::new_http(url))
}

#[async_trait]
impl ChainClient for RpcChainClient {
	fn chain_id(&self) -> u64 {
		self.chain_id
	}

	async fn block_number(&self) -> Result<u64, ChainError> {
		let provider = self.provider.read().await;
		provider
			.get_block_number()
			.await
			.map_err(|e| ChainError::Rpc(format!("Failed to get block number: {}", e)))
	}

	async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError> {
		let provider = self.provider.read().await;
		provider
			.get_logs(filter)
			.await
			.map_err(|e| ChainError::Rpc(format!("Failed to get logs: {}", e)))
	}

	async fn call(&self, to: Address, data: Vec<u8>) -> Result<Bytes, ChainError> {
		let request = TransactionRequest {
			to: Some(TxKind::Call(to)),
			input: TransactionInput {
				input: Some(Bytes::from(data)),
				data: None,
			},
			..Default::default()
		};

		let provider = self.provider.read().await;
		provider
			.call(&request)
			.await
			.map_err(|e| ChainError::Rpc(format!("eth_call failed: {}", e)))
	}

	async fn storage_at(&self, address: Address, slot: U256) -> Result<B256, ChainError> {
		let provider = self.provider.read().await;
		let word = provider
			.get_storage_at(address, slot)
			.await
			.map_err(|e| ChainError::Rpc(format!("Failed to get storage: {}", e)))?;
		Ok(B256::from(word.to_be_bytes::<32>()))
	}

	async fn estimate_gas(
		&self,
		from: Address,
		to: Address,
		data: Vec<u8>,
	) -> Result<u64, ChainError> {
		let request = TransactionRequest {
			from: Some(from),
			to: Some(TxKind::Call(to)),
			input: TransactionInput {
				input: Some(Bytes::from(data)),
				data: None,
			},
			..Default::default()
		};

		let provider = self.provider.read().await;
		provider
			.estimate_gas(&request)
			.await
			.map_err(|e| ChainError::Rpc(format!("Gas estimation failed: {}", e)))
	}

	async fn reconnect(&self) -> Result<(), ChainError> {
		let fresh = build_provider(&self.rpc_url)?;

		fresh
			.get_block_number()
			.await
			.map_err(|e| ChainError::Connection(format!("Reconnect failed: {}", e)))?;

		*self.provider.write().await = fresh;
		info!(chain_id = self.chain_id, "Recreated node connection");
		Ok(())
	}
}
