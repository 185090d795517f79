//! Registry calldata encoding.
//!
//! Wraps order parameters into the generic conditional-order envelope for
//! creation, and the order hash into a removal call for cancellation. The
//! static input always carries the app-data tag word going forward; legacy
//! 8-field blobs exist only on the decode side.

use alloy::primitives::{keccak256, Address, B256};
use alloy::sol_types::SolCall;
use keeper_types::contracts::IConditionalOrderRegistry;
use keeper_types::{OrderParams, TransactionStep};
use uuid::Uuid;

/// Generates a fresh salt for a create transaction.
///
/// Uniqueness is what matters: the salt namespaces otherwise identical
/// orders under distinct hashes.
pub fn fresh_salt() -> B256 {
	keccak256(Uuid::new_v4().as_bytes())
}

/// ABI-packs the 9-field static input blob.
pub fn encode_order_params(params: &OrderParams) -> Vec<u8> {
	params.encode_static_input()
}

/// Calldata for `create`, dispatching the creation event for watchtowers.
pub fn create_call_data(params: &OrderParams) -> Vec<u8> {
	IConditionalOrderRegistry::createCall {
		params: params.to_envelope(),
		dispatch: true,
	}
	.abi_encode()
}

/// Calldata for `remove`.
pub fn cancel_call_data(order_hash: &B256) -> Vec<u8> {
	IConditionalOrderRegistry::removeCall {
		singleOrderHash: *order_hash,
	}
	.abi_encode()
}

/// Builds the `create` transaction against the registry.
pub fn build_create_transaction(registry: &Address, params: &OrderParams) -> TransactionStep {
	TransactionStep::new(registry, create_call_data(params), "Create conditional order")
}

/// Builds the `remove` transaction for a previously created order.
pub fn build_cancel_transaction(registry: &Address, order_hash: &B256) -> TransactionStep {
	TransactionStep::new(registry, cancel_call_data(order_hash), "Cancel conditional order")
}
