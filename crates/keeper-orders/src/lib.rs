//! Order creation and cancellation for the keeper system.
//!
//! This crate derives protocol identifiers (order hash via the registry
//! contract, order UID by fixed-layout packing), encodes the registry
//! calldata, and assembles the multi-step unsigned transaction batches a
//! wallet signs. The [`flow::OrderFlow`] service ties these together with
//! the order repository for the draft-creation path.

use keeper_chain::ChainError;
use keeper_storage::StorageError;
use thiserror::Error;

pub mod batch;
pub mod encoder;
pub mod flow;
pub mod uid;

pub use batch::{BatchBuilder, BatchConfig, BatchError};
pub use flow::{CreateOrderRequest, OrderFlow};
pub use uid::UidCalculator;

/// Errors surfaced by the order creation/cancellation flow. Hash and UID
/// computation failures are fatal to the requesting operation; no partial
/// state is written.
#[derive(Debug, Error)]
pub enum OrderFlowError {
	#[error("Hash computation failed: {0}")]
	HashComputation(String),
	#[error("Validation failed: {0}")]
	ValidationFailed(String),
	#[error("Order not found: {0}")]
	NotFound(String),
	#[error("Chain error: {0}")]
	Chain(#[from] ChainError),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
	#[error(transparent)]
	Batch(#[from] BatchError),
}
