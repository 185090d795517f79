//! Order persistence for the keeper system.
//!
//! This module defines the `OrderRepository` trait through which the core
//! consumes the relational store. The store itself is an external
//! collaborator; the in-memory implementation here backs the default wiring
//! and the test suites. Lifecycle and cursor invariants are enforced behind
//! the trait so every backend carries them.

use async_trait::async_trait;
use keeper_types::{FillDetail, Order, OrderStatus};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod memory;
}

pub use implementations::memory::MemoryOrderRepository;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// The requested order does not exist.
	#[error("Not found")]
	NotFound,
	/// A status change violates the forward-only lifecycle machine.
	#[error("Invalid status transition: {from} -> {to}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
	/// An order hash is already bound to a different record, or a write
	/// attempted to change a hash that is set.
	#[error("Order hash conflict: {0}")]
	HashConflict(String),
	/// The processed-block cursor only moves forward.
	#[error("Cursor regression: current {current}, requested {requested}")]
	CursorRegression { current: u64, requested: u64 },
	/// Error in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
}

/// Persisted order records plus the processed-block cursor.
#[async_trait]
pub trait OrderRepository: Send + Sync {
	/// Inserts an externally created draft order (no chain provenance).
	async fn insert_draft(&self, order: Order) -> Result<(), StorageError>;

	/// Inserts or replaces an order keyed by its order hash. The record must
	/// carry a hash; a replace keeps the existing surrogate id and must obey
	/// the status transition machine.
	async fn upsert_by_hash(&self, order: Order) -> Result<(), StorageError>;

	async fn get_by_id(&self, id: &str) -> Result<Option<Order>, StorageError>;

	async fn get_by_hash(&self, hash: &str) -> Result<Option<Order>, StorageError>;

	async fn get_by_hash_and_owner(
		&self,
		hash: &str,
		owner: &str,
	) -> Result<Option<Order>, StorageError>;

	/// Transitions an order's status, recording fill/cancel detail when
	/// given. Rejects transitions the lifecycle machine does not allow.
	async fn update_status(
		&self,
		id: &str,
		status: OrderStatus,
		fill: Option<FillDetail>,
	) -> Result<(), StorageError>;

	/// Records the 56-byte protocol UID for an order.
	async fn set_order_uid(&self, id: &str, uid: &str) -> Result<(), StorageError>;

	/// Live orders whose UID has not been derived yet.
	async fn get_live_orders_missing_uid(&self) -> Result<Vec<Order>, StorageError>;

	/// Last fully processed block, if any range has completed.
	async fn get_latest_processed_block(&self) -> Result<Option<u64>, StorageError>;

	/// Advances the processed-block cursor. Rejects regressions.
	async fn set_processed_block(&self, block: u64) -> Result<(), StorageError>;
}
