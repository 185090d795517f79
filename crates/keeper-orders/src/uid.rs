//! Order hash and UID derivation.
//!
//! The order hash comes from a read-only call against the registry
//! contract, which canonically hashes the envelope. Offloading this to the
//! authoritative on-chain definition trades a network round trip for
//! correctness; there is deliberately no local fallback. The UID is a pure
//! 56-byte packing on top of the hash.

use crate::OrderFlowError;
use alloy::primitives::{Address, B256};
use alloy::sol_types::SolCall;
use keeper_chain::ChainClient;
use keeper_types::contracts::IConditionalOrderRegistry;
use keeper_types::{pack_order_uid, OrderParams, ORDER_UID_LEN};
use std::sync::Arc;

/// Derives order hashes and UIDs.
pub struct UidCalculator {
	client: Arc<dyn ChainClient>,
	registry: Address,
}

impl UidCalculator {
	pub fn new(client: Arc<dyn ChainClient>, registry: Address) -> Self {
		Self { client, registry }
	}

	/// Canonical order hash via the registry's `hash` view function.
	///
	/// Any RPC failure propagates; the caller must not write partial state.
	pub async fn compute_order_hash(&self, params: &OrderParams) -> Result<B256, OrderFlowError> {
		let call = IConditionalOrderRegistry::hashCall {
			params: params.to_envelope(),
		};

		let ret = self.client.call(self.registry, call.abi_encode()).await?;

		let decoded = IConditionalOrderRegistry::hashCall::abi_decode_returns(&ret, true)
			.map_err(|e| OrderFlowError::HashComputation(e.to_string()))?;

		Ok(decoded._0)
	}

	/// Fixed-layout UID packing: hash, owner, big-endian validTo.
	pub fn compute_order_uid(
		&self,
		hash: &B256,
		owner: &Address,
		valid_to: u32,
	) -> [u8; ORDER_UID_LEN] {
		pack_order_uid(hash, owner, valid_to)
	}

	/// Composes hash computation and UID packing, using the order's end
	/// time as `validTo`.
	pub async fn compute_complete_uid(
		&self,
		params: &OrderParams,
		owner: &Address,
	) -> Result<[u8; ORDER_UID_LEN], OrderFlowError> {
		let hash = self.compute_order_hash(params).await?;
		Ok(pack_order_uid(&hash, owner, params.end_time as u32))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::{Bytes, U256};
	use alloy::rpc::types::{Filter, Log};
	use alloy::sol_types::SolValue;
	use async_trait::async_trait;
	use keeper_chain::ChainError;
	use std::sync::Mutex;

	/// Records the last eth_call and answers with a fixed hash.
	struct StubChain {
		hash: B256,
		fail: bool,
		last_call: Mutex<Option<(Address, Vec<u8>)>>,
	}

	impl StubChain {
		fn returning(hash: B256) -> Self {
			Self {
				hash,
				fail: false,
				last_call: Mutex::new(None),
			}
		}

		fn failing() -> Self {
			Self {
				hash: B256::ZERO,
				fail: true,
				last_call: Mutex::new(None),
			}
		}
	}

	#[async_trait]
	impl ChainClient for StubChain {
		fn chain_id(&self) -> u64 {
			137
		}

		async fn block_number(&self) -> Result<u64, ChainError> {
			Ok(0)
		}

		async fn get_logs(&self, _filter: &Filter) -> Result<Vec<Log>, ChainError> {
			Ok(vec![])
		}

		async fn call(&self, to: Address, data: Vec<u8>) -> Result<Bytes, ChainError> {
			if self.fail {
				return Err(ChainError::Rpc("injected failure".to_string()));
			}
			*self.last_call.lock().unwrap() = Some((to, data));
			Ok(self.hash.abi_encode().into())
		}

		async fn storage_at(&self, _address: Address, _slot: U256) -> Result<B256, ChainError> {
			Ok(B256::ZERO)
		}

		async fn estimate_gas(
			&self,
			_from: Address,
			_to: Address,
			_data: Vec<u8>,
		) -> Result<u64, ChainError> {
			Ok(21_000)
		}

		async fn reconnect(&self) -> Result<(), ChainError> {
			Ok(())
		}
	}

	fn sample_params() -> OrderParams {
		OrderParams {
			handler: Address::repeat_byte(0x42),
			salt: B256::repeat_byte(0x01),
			sell_token: Address::repeat_byte(0xaa),
			buy_token: Address::repeat_byte(0xbb),
			receiver: Address::repeat_byte(0xcc),
			sell_amount: U256::from(1_000_000u64),
			min_buy_amount: U256::from(1u64),
			start_time: 1_700_000_000,
			end_time: 1_701_000_000,
			polymarket_order_hash: B256::ZERO,
			app_data: B256::ZERO,
		}
	}

	#[tokio::test]
	async fn hash_comes_from_registry_call() {
		let registry = Address::repeat_byte(0x10);
		let expected = B256::repeat_byte(0x99);
		let chain = Arc::new(StubChain::returning(expected));
		let calc = UidCalculator::new(chain.clone(), registry);

		let hash = calc.compute_order_hash(&sample_params()).await.unwrap();
		assert_eq!(hash, expected);

		let (to, data) = chain.last_call.lock().unwrap().clone().unwrap();
		assert_eq!(to, registry);
		assert_eq!(&data[0..4], IConditionalOrderRegistry::hashCall::SELECTOR);
	}

	#[tokio::test]
	async fn rpc_failure_propagates() {
		let calc = UidCalculator::new(
			Arc::new(StubChain::failing()),
			Address::repeat_byte(0x10),
		);

		let err = calc.compute_order_hash(&sample_params()).await.unwrap_err();
		assert!(matches!(err, OrderFlowError::Chain(_)));
	}

	#[tokio::test]
	async fn complete_uid_uses_end_time_as_valid_to() {
		let hash = B256::repeat_byte(0x99);
		let owner = Address::repeat_byte(0xee);
		let calc = UidCalculator::new(
			Arc::new(StubChain::returning(hash)),
			Address::repeat_byte(0x10),
		);

		let params = sample_params();
		let uid = calc.compute_complete_uid(&params, &owner).await.unwrap();

		assert_eq!(uid.len(), ORDER_UID_LEN);
		assert_eq!(&uid[0..32], hash.as_slice());
		assert_eq!(&uid[32..52], owner.as_slice());
		assert_eq!(
			u32::from_be_bytes([uid[52], uid[53], uid[54], uid[55]]),
			params.end_time as u32
		);
	}
}
