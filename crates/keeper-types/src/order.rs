//! Order types for the keeper system.
//!
//! This module defines the persisted order record, its lifecycle state
//! machine, and the on-chain parameter set from which hashes and UIDs are
//! derived.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced when converting between wire and domain representations.
#[derive(Debug, Error)]
pub enum DomainError {
	#[error("Invalid address: {0}")]
	InvalidAddress(String),
	#[error("Invalid hash: {0}")]
	InvalidHash(String),
	#[error("Invalid amount: {0}")]
	InvalidAmount(String),
}

/// Lifecycle status of a conditional swap order.
///
/// Transitions only move forward: `Draft -> Live`, `Live -> Filled`,
/// `Live -> Canceled`. Everything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
	Draft,
	Live,
	Filled,
	Canceled,
}

impl OrderStatus {
	/// Returns true if the state machine allows moving from `self` to `next`.
	pub fn can_transition_to(self, next: OrderStatus) -> bool {
		matches!(
			(self, next),
			(OrderStatus::Draft, OrderStatus::Live)
				| (OrderStatus::Live, OrderStatus::Filled)
				| (OrderStatus::Live, OrderStatus::Canceled)
		)
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			OrderStatus::Draft => "draft",
			OrderStatus::Live => "live",
			OrderStatus::Filled => "filled",
			OrderStatus::Canceled => "canceled",
		};
		write!(f, "{}", s)
	}
}

/// Fill or cancel detail recorded when a settlement event is applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FillDetail {
	pub filled_at: Option<u64>,
	pub fill_transaction_hash: Option<String>,
	pub fill_block_number: Option<u64>,
	pub fill_log_index: Option<u64>,
	pub actual_sell_amount: Option<String>,
	pub actual_buy_amount: Option<String>,
	pub fee_amount: Option<String>,
}

/// Persisted record of a conditional swap order.
///
/// Addresses are stored in lower-cased `0x`-prefixed form; integer amounts
/// are decimal strings. `order_hash` is nullable while the order is a draft
/// and immutable once set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
	/// Process-assigned surrogate key, always present.
	pub id: String,
	/// 32-byte protocol order hash, hex-encoded; set once known on-chain.
	pub order_hash: Option<String>,
	/// 56-byte protocol order UID, hex-encoded.
	pub order_uid: Option<String>,

	pub owner: String,
	pub handler: String,
	pub sell_token: String,
	pub buy_token: String,
	pub receiver: String,
	pub sell_amount: String,
	pub min_buy_amount: String,

	/// Absolute start timestamp in seconds.
	pub start_time: u64,
	/// Absolute end timestamp in seconds; doubles as the protocol `validTo`.
	pub end_time: u64,

	/// Linked prediction-market order reference; zero-filled when absent.
	pub polymarket_order_hash: String,
	/// Opaque 32-byte tag; zero-filled when absent.
	pub app_data: String,
	pub market_id: Option<String>,
	pub outcome_selected: Option<String>,
	pub bet_percentage: Option<u8>,

	/// Chain provenance, set together once the creation event is observed.
	pub block_number: Option<u64>,
	pub transaction_hash: Option<String>,
	pub log_index: Option<u64>,

	#[serde(flatten)]
	pub fill: FillDetail,

	pub status: OrderStatus,
}

impl Order {
	/// Returns true when the given provenance pair has already been applied
	/// to this record.
	pub fn has_provenance(&self, block_number: u64, log_index: u64) -> bool {
		self.block_number == Some(block_number) && self.log_index == Some(log_index)
	}

	/// Returns true when the given fill provenance pair has already been
	/// applied to this record.
	pub fn has_fill_provenance(&self, block_number: u64, log_index: u64) -> bool {
		self.fill.fill_block_number == Some(block_number)
			&& self.fill.fill_log_index == Some(log_index)
	}
}

/// On-chain parameter set of a conditional order.
///
/// This is the typed form of the registry's static-input blob together with
/// the envelope fields (handler, salt) that participate in the order hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderParams {
	pub handler: Address,
	pub salt: B256,
	pub sell_token: Address,
	pub buy_token: Address,
	pub receiver: Address,
	pub sell_amount: U256,
	pub min_buy_amount: U256,
	pub start_time: u64,
	pub end_time: u64,
	/// Linked prediction-market order hash; `B256::ZERO` when absent.
	pub polymarket_order_hash: B256,
	/// Opaque app-data tag; `B256::ZERO` when absent.
	pub app_data: B256,
}

/// Formats an address in the lower-cased canonical form used by the
/// order store.
pub fn format_address(address: &Address) -> String {
	format!("{:#x}", address)
}

/// Formats a 32-byte hash as a lower-cased `0x` hex string.
pub fn format_hash(hash: &B256) -> String {
	format!("{:#x}", hash)
}

/// Parses a `0x`-prefixed address string.
pub fn parse_address(s: &str) -> Result<Address, DomainError> {
	s.parse::<Address>()
		.map_err(|_| DomainError::InvalidAddress(s.to_string()))
}

/// Parses a `0x`-prefixed 32-byte hash string.
pub fn parse_hash(s: &str) -> Result<B256, DomainError> {
	s.parse::<B256>()
		.map_err(|_| DomainError::InvalidHash(s.to_string()))
}

/// Parses a decimal-string amount into a U256.
pub fn parse_amount(s: &str) -> Result<U256, DomainError> {
	U256::from_str_radix(s, 10).map_err(|_| DomainError::InvalidAmount(s.to_string()))
}
