//! Solidity type definitions shared by the decoder, the hash calculator,
//! and the transaction encoder.
//!
//! These types match the on-chain ABI of the settlement and registry
//! contracts for event decoding and calldata generation.

use alloy::primitives::{keccak256, B256, U256};
use alloy::sol;
use alloy::sol_types::SolValue;

use crate::order::OrderParams;

sol! {
	/// Envelope stored by the conditional-order registry. The registry
	/// treats `staticInput` as opaque bytes; only the handler interprets it.
	#[derive(Debug, PartialEq, Eq)]
	struct ConditionalOrderParams {
		address handler;
		bytes32 salt;
		bytes staticInput;
	}

	interface IConditionalOrderRegistry {
		/// Registers a conditional order and optionally dispatches a
		/// creation event for watchtowers.
		function create(ConditionalOrderParams params, bool dispatch) external;

		/// Removes a previously created conditional order.
		function remove(bytes32 singleOrderHash) external;

		/// Canonical hash of the (handler, salt, staticInput) tuple.
		function hash(ConditionalOrderParams params) external pure returns (bytes32);
	}

	interface IERC20 {
		function balanceOf(address owner) external view returns (uint256);
		function allowance(address owner, address spender) external view returns (uint256);
		function approve(address spender, uint256 amount) external returns (bool);
	}

	interface ISafe {
		function setFallbackHandler(address handler) external;
	}

	/// Exposed on the wallet once the extensible fallback handler is
	/// installed; routes EIP-1271 verification for a settlement domain.
	interface ISignatureVerifierMuxer {
		function setDomainVerifier(bytes32 domainSeparator, address newVerifier) external;
	}

	/// Emitted by the registry when a conditional order is created.
	event ConditionalOrderCreated(address indexed owner, ConditionalOrderParams params);

	/// Emitted by the settlement contract when an order trades.
	event Trade(
		address indexed owner,
		address sellToken,
		address buyToken,
		uint256 sellAmount,
		uint256 buyAmount,
		uint256 feeAmount,
		bytes orderUid
	);

	/// Emitted by the settlement contract when an order is invalidated.
	event OrderInvalidated(address indexed owner, bytes orderUid);
}

/// Number of 32-byte words in a current-format static input.
pub const STATIC_INPUT_WORDS: usize = 9;

/// Number of 32-byte words in a legacy static input (no app-data tag).
pub const STATIC_INPUT_WORDS_LEGACY: usize = 8;

impl OrderParams {
	/// ABI-packs the static input: nine 32-byte words in field order
	/// sellToken, buyToken, receiver, sellAmount, minBuyAmount, startTime,
	/// endTime, externalOrderRef, appData. The tag word is always emitted;
	/// absent tags are the zero sentinel.
	pub fn encode_static_input(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(STATIC_INPUT_WORDS * 32);
		out.extend_from_slice(self.sell_token.into_word().as_slice());
		out.extend_from_slice(self.buy_token.into_word().as_slice());
		out.extend_from_slice(self.receiver.into_word().as_slice());
		out.extend_from_slice(&self.sell_amount.to_be_bytes::<32>());
		out.extend_from_slice(&self.min_buy_amount.to_be_bytes::<32>());
		out.extend_from_slice(&U256::from(self.start_time).to_be_bytes::<32>());
		out.extend_from_slice(&U256::from(self.end_time).to_be_bytes::<32>());
		out.extend_from_slice(self.polymarket_order_hash.as_slice());
		out.extend_from_slice(self.app_data.as_slice());
		out
	}

	/// Wraps the static input in the registry envelope.
	pub fn to_envelope(&self) -> ConditionalOrderParams {
		ConditionalOrderParams {
			handler: self.handler,
			salt: self.salt,
			staticInput: self.encode_static_input().into(),
		}
	}
}

/// Canonical hash of a conditional-order envelope: keccak over the ABI
/// encoding of the (handler, salt, staticInput) tuple. This mirrors the
/// registry's own `hash` function and is used to identify creation events.
pub fn conditional_order_hash(params: &ConditionalOrderParams) -> B256 {
	keccak256(params.abi_encode())
}
