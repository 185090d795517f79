//! Decoded settlement events.
//!
//! The decoder produces this closed union; downstream code matches on it
//! exhaustively instead of probing loosely-typed event objects.

use alloy::primitives::{Address, B256, U256};

use crate::order::OrderParams;

/// Chain provenance attached to every decoded event. The
/// `(block_number, log_index)` pair is the idempotency key for event
/// application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
	pub block_number: u64,
	pub transaction_hash: B256,
	pub log_index: u64,
}

/// A conditional order was registered on-chain.
#[derive(Debug, Clone)]
pub struct OrderCreatedEvent {
	pub owner: Address,
	/// Canonical hash of the re-encoded (handler, salt, staticInput) tuple.
	pub order_hash: B256,
	pub params: OrderParams,
	pub meta: BlockMeta,
}

/// An order traded against the settlement contract.
#[derive(Debug, Clone)]
pub struct TradeEvent {
	pub owner: Address,
	pub sell_token: Address,
	pub buy_token: Address,
	pub sell_amount: U256,
	pub buy_amount: U256,
	pub fee_amount: U256,
	/// 56-byte protocol order UID.
	pub order_uid: Vec<u8>,
	pub meta: BlockMeta,
}

/// An order was invalidated on the settlement contract.
#[derive(Debug, Clone)]
pub struct OrderInvalidatedEvent {
	pub owner: Address,
	/// 56-byte protocol order UID.
	pub order_uid: Vec<u8>,
	pub meta: BlockMeta,
}

/// Closed union of the settlement events this system reconciles.
#[derive(Debug, Clone)]
pub enum DecodedEvent {
	OrderCreated(OrderCreatedEvent),
	Trade(TradeEvent),
	OrderInvalidated(OrderInvalidatedEvent),
}

impl DecodedEvent {
	pub fn meta(&self) -> &BlockMeta {
		match self {
			DecodedEvent::OrderCreated(e) => &e.meta,
			DecodedEvent::Trade(e) => &e.meta,
			DecodedEvent::OrderInvalidated(e) => &e.meta,
		}
	}
}
