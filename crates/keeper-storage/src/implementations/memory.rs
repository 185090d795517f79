//! In-memory repository backend.
//!
//! Backs the default service wiring and the test suites. Records live in
//! concurrent maps keyed by surrogate id, with a secondary hash index.

use crate::{OrderRepository, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;
use keeper_types::{FillDetail, Order, OrderStatus};
use std::sync::Mutex;

/// Dashmap-backed order repository.
pub struct MemoryOrderRepository {
	/// Surrogate id -> order record.
	orders: DashMap<String, Order>,
	/// Order hash -> surrogate id.
	by_hash: DashMap<String, String>,
	/// Processed-block cursor; `None` until the first range completes.
	cursor: Mutex<Option<u64>>,
}

impl MemoryOrderRepository {
	pub fn new() -> Self {
		Self {
			orders: DashMap::new(),
			by_hash: DashMap::new(),
			cursor: Mutex::new(None),
		}
	}

	fn merge_fill(order: &mut Order, fill: FillDetail) {
		if fill.filled_at.is_some() {
			order.fill.filled_at = fill.filled_at;
		}
		if fill.fill_transaction_hash.is_some() {
			order.fill.fill_transaction_hash = fill.fill_transaction_hash;
		}
		if fill.fill_block_number.is_some() {
			order.fill.fill_block_number = fill.fill_block_number;
		}
		if fill.fill_log_index.is_some() {
			order.fill.fill_log_index = fill.fill_log_index;
		}
		if fill.actual_sell_amount.is_some() {
			order.fill.actual_sell_amount = fill.actual_sell_amount;
		}
		if fill.actual_buy_amount.is_some() {
			order.fill.actual_buy_amount = fill.actual_buy_amount;
		}
		if fill.fee_amount.is_some() {
			order.fill.fee_amount = fill.fee_amount;
		}
	}
}

impl Default for MemoryOrderRepository {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
	async fn insert_draft(&self, order: Order) -> Result<(), StorageError> {
		if self.orders.contains_key(&order.id) {
			return Err(StorageError::Backend(format!(
				"Duplicate order id: {}",
				order.id
			)));
		}

		if let Some(hash) = &order.order_hash {
			if self.by_hash.contains_key(hash) {
				return Err(StorageError::HashConflict(hash.clone()));
			}
			self.by_hash.insert(hash.clone(), order.id.clone());
		}

		self.orders.insert(order.id.clone(), order);
		Ok(())
	}

	async fn upsert_by_hash(&self, mut order: Order) -> Result<(), StorageError> {
		let hash = order
			.order_hash
			.clone()
			.ok_or_else(|| StorageError::Backend("upsert_by_hash requires a hash".to_string()))?;

		if let Some(existing_id) = self.by_hash.get(&hash).map(|e| e.value().clone()) {
			let mut entry = self
				.orders
				.get_mut(&existing_id)
				.ok_or(StorageError::NotFound)?;

			let existing = entry.value();
			if existing.status != order.status
				&& !existing.status.can_transition_to(order.status)
			{
				return Err(StorageError::InvalidTransition {
					from: existing.status,
					to: order.status,
				});
			}

			// The surrogate id is stable across merges.
			order.id = existing_id;
			*entry.value_mut() = order;
		} else {
			self.by_hash.insert(hash, order.id.clone());
			self.orders.insert(order.id.clone(), order);
		}

		Ok(())
	}

	async fn get_by_id(&self, id: &str) -> Result<Option<Order>, StorageError> {
		Ok(self.orders.get(id).map(|e| e.value().clone()))
	}

	async fn get_by_hash(&self, hash: &str) -> Result<Option<Order>, StorageError> {
		let Some(id) = self.by_hash.get(hash).map(|e| e.value().clone()) else {
			return Ok(None);
		};
		self.get_by_id(&id).await
	}

	async fn get_by_hash_and_owner(
		&self,
		hash: &str,
		owner: &str,
	) -> Result<Option<Order>, StorageError> {
		Ok(self
			.get_by_hash(hash)
			.await?
			.filter(|order| order.owner == owner))
	}

	async fn update_status(
		&self,
		id: &str,
		status: OrderStatus,
		fill: Option<FillDetail>,
	) -> Result<(), StorageError> {
		let mut entry = self.orders.get_mut(id).ok_or(StorageError::NotFound)?;
		let order = entry.value_mut();

		if !order.status.can_transition_to(status) {
			return Err(StorageError::InvalidTransition {
				from: order.status,
				to: status,
			});
		}

		order.status = status;
		if let Some(fill) = fill {
			Self::merge_fill(order, fill);
		}

		Ok(())
	}

	async fn set_order_uid(&self, id: &str, uid: &str) -> Result<(), StorageError> {
		let mut entry = self.orders.get_mut(id).ok_or(StorageError::NotFound)?;
		entry.value_mut().order_uid = Some(uid.to_string());
		Ok(())
	}

	async fn get_live_orders_missing_uid(&self) -> Result<Vec<Order>, StorageError> {
		Ok(self
			.orders
			.iter()
			.filter(|e| e.value().status == OrderStatus::Live && e.value().order_uid.is_none())
			.map(|e| e.value().clone())
			.collect())
	}

	async fn get_latest_processed_block(&self) -> Result<Option<u64>, StorageError> {
		Ok(*self.cursor.lock().expect("cursor lock poisoned"))
	}

	async fn set_processed_block(&self, block: u64) -> Result<(), StorageError> {
		let mut cursor = self.cursor.lock().expect("cursor lock poisoned");
		if let Some(current) = *cursor {
			if block < current {
				return Err(StorageError::CursorRegression {
					current,
					requested: block,
				});
			}
		}
		*cursor = Some(block);
		Ok(())
	}
}
