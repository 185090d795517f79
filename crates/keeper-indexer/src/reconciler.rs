//! Order state reconciliation.
//!
//! Applies decoded settlement events to the order repository under the
//! forward-only lifecycle machine. All operations are idempotent under
//! `(block_number, log_index)` replay: re-applying an already-applied event
//! detects the existing provenance key and changes nothing.
//!
//! Trade and invalidation events are matched strictly by protocol UID. The
//! shared settlement contract legitimately carries unrelated orders, so a
//! failed match is a no-op, not an error.

use keeper_storage::{OrderRepository, StorageError};
use keeper_types::{
	format_address, format_hash, pack_order_uid, parse_address, parse_hash, split_order_uid,
	DecodedEvent, FillDetail, Order, OrderCreatedEvent, OrderInvalidatedEvent, OrderStatus,
	TradeEvent,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReconcileError {
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// Applies decoded events to the order repository.
pub struct Reconciler {
	repo: Arc<dyn OrderRepository>,
}

impl Reconciler {
	pub fn new(repo: Arc<dyn OrderRepository>) -> Self {
		Self { repo }
	}

	pub async fn apply_event(&self, event: &DecodedEvent) -> Result<(), ReconcileError> {
		match event {
			DecodedEvent::OrderCreated(e) => self.apply_order_created(e).await,
			DecodedEvent::Trade(e) => self.apply_trade(e).await,
			DecodedEvent::OrderInvalidated(e) => self.apply_order_invalidated(e).await,
		}
	}

	/// Upserts keyed by order hash. A pre-existing draft (created by the
	/// external flow) gets the chain provenance merged in and goes live; an
	/// unknown hash is inserted fresh as live.
	pub async fn apply_order_created(
		&self,
		event: &OrderCreatedEvent,
	) -> Result<(), ReconcileError> {
		let hash = format_hash(&event.order_hash);

		if let Some(existing) = self.repo.get_by_hash(&hash).await? {
			if existing.has_provenance(event.meta.block_number, event.meta.log_index) {
				debug!(order_hash = %hash, "Creation event already applied");
				return Ok(());
			}

			if existing.status != OrderStatus::Draft {
				warn!(
					order_hash = %hash,
					status = %existing.status,
					block = event.meta.block_number,
					"Creation event for an order that is already past draft"
				);
				return Ok(());
			}

			let mut merged = existing;
			merge_chain_fields(&mut merged, event);
			merged.status = OrderStatus::Live;
			self.repo.upsert_by_hash(merged).await?;

			info!(order_hash = %hash, block = event.meta.block_number, "Draft order went live");
		} else {
			self.repo.upsert_by_hash(order_from_event(event)).await?;
			info!(order_hash = %hash, block = event.meta.block_number, "Observed new live order");
		}

		Ok(())
	}

	/// Marks a live order filled, recording fill detail from the event.
	pub async fn apply_trade(&self, event: &TradeEvent) -> Result<(), ReconcileError> {
		let Some(order) = self.lookup_by_uid(&event.order_uid, "trade").await? else {
			return Ok(());
		};

		if order.has_fill_provenance(event.meta.block_number, event.meta.log_index) {
			debug!(order_id = %order.id, "Trade event already applied");
			return Ok(());
		}

		if order.status != OrderStatus::Live {
			warn!(
				order_id = %order.id,
				status = %order.status,
				"Trade event for an order that is not live; skipping"
			);
			return Ok(());
		}

		let fill = FillDetail {
			filled_at: Some(chrono::Utc::now().timestamp() as u64),
			fill_transaction_hash: Some(format_hash(&event.meta.transaction_hash)),
			fill_block_number: Some(event.meta.block_number),
			fill_log_index: Some(event.meta.log_index),
			actual_sell_amount: Some(event.sell_amount.to_string()),
			actual_buy_amount: Some(event.buy_amount.to_string()),
			fee_amount: Some(event.fee_amount.to_string()),
		};

		if order.order_uid.is_none() {
			let uid_hex = format!("0x{}", hex::encode(&event.order_uid));
			self.repo.set_order_uid(&order.id, &uid_hex).await?;
		}

		self.repo
			.update_status(&order.id, OrderStatus::Filled, Some(fill))
			.await?;

		info!(order_id = %order.id, block = event.meta.block_number, "Order filled");
		Ok(())
	}

	/// Marks a live order canceled.
	pub async fn apply_order_invalidated(
		&self,
		event: &OrderInvalidatedEvent,
	) -> Result<(), ReconcileError> {
		let Some(order) = self.lookup_by_uid(&event.order_uid, "invalidation").await? else {
			return Ok(());
		};

		if order.has_fill_provenance(event.meta.block_number, event.meta.log_index) {
			debug!(order_id = %order.id, "Invalidation event already applied");
			return Ok(());
		}

		if order.status != OrderStatus::Live {
			warn!(
				order_id = %order.id,
				status = %order.status,
				"Invalidation event for an order that is not live; skipping"
			);
			return Ok(());
		}

		let detail = FillDetail {
			fill_transaction_hash: Some(format_hash(&event.meta.transaction_hash)),
			fill_block_number: Some(event.meta.block_number),
			fill_log_index: Some(event.meta.log_index),
			..FillDetail::default()
		};

		self.repo
			.update_status(&order.id, OrderStatus::Canceled, Some(detail))
			.await?;

		info!(order_id = %order.id, block = event.meta.block_number, "Order canceled");
		Ok(())
	}

	/// Derives UIDs for live orders that are still missing one. Pure
	/// derivation: the hash is already known on-chain, so the UID is just
	/// the (hash, owner, validTo) packing.
	pub async fn backfill_missing_uids(&self) -> Result<usize, ReconcileError> {
		let mut derived = 0;

		for order in self.repo.get_live_orders_missing_uid().await? {
			let (Some(hash_str), Ok(owner)) = (&order.order_hash, parse_address(&order.owner))
			else {
				continue;
			};
			let Ok(hash) = parse_hash(hash_str) else {
				continue;
			};

			let uid = pack_order_uid(&hash, &owner, order.end_time as u32);
			let uid_hex = format!("0x{}", hex::encode(uid));
			self.repo.set_order_uid(&order.id, &uid_hex).await?;
			derived += 1;
		}

		if derived > 0 {
			debug!(count = derived, "Derived missing order UIDs");
		}

		Ok(derived)
	}

	/// Strict UID match: the order hash and owner are projected out of the
	/// UID, and a stored UID (or, failing that, the order's own expiry) must
	/// agree with the event's UID.
	async fn lookup_by_uid(
		&self,
		uid: &[u8],
		kind: &str,
	) -> Result<Option<Order>, ReconcileError> {
		let Some((hash, owner, valid_to)) = split_order_uid(uid) else {
			warn!(len = uid.len(), "Malformed order UID in {} event", kind);
			return Ok(None);
		};

		let hash_hex = format_hash(&hash);
		let owner_hex = format_address(&owner);

		let Some(order) = self
			.repo
			.get_by_hash_and_owner(&hash_hex, &owner_hex)
			.await?
		else {
			debug!(order_hash = %hash_hex, "Unmatched {} event; unrelated order", kind);
			return Ok(None);
		};

		let uid_hex = format!("0x{}", hex::encode(uid));
		match &order.order_uid {
			Some(stored) if !stored.eq_ignore_ascii_case(&uid_hex) => {
				warn!(
					order_id = %order.id,
					"Stored UID does not match {} event UID; skipping",
					kind
				);
				Ok(None)
			}
			None if order.end_time as u32 != valid_to => {
				warn!(
					order_id = %order.id,
					"Event validTo does not match order expiry; skipping {}",
					kind
				);
				Ok(None)
			}
			_ => Ok(Some(order)),
		}
	}
}

fn merge_chain_fields(order: &mut Order, event: &OrderCreatedEvent) {
	let p = &event.params;

	order.owner = format_address(&event.owner);
	order.handler = format_address(&p.handler);
	order.sell_token = format_address(&p.sell_token);
	order.buy_token = format_address(&p.buy_token);
	order.receiver = format_address(&p.receiver);
	order.sell_amount = p.sell_amount.to_string();
	order.min_buy_amount = p.min_buy_amount.to_string();
	order.start_time = p.start_time;
	order.end_time = p.end_time;
	order.polymarket_order_hash = format_hash(&p.polymarket_order_hash);
	order.app_data = format_hash(&p.app_data);

	order.block_number = Some(event.meta.block_number);
	order.transaction_hash = Some(format_hash(&event.meta.transaction_hash));
	order.log_index = Some(event.meta.log_index);

	let uid = pack_order_uid(&event.order_hash, &event.owner, p.end_time as u32);
	order.order_uid = Some(format!("0x{}", hex::encode(uid)));
}

fn order_from_event(event: &OrderCreatedEvent) -> Order {
	let mut order = Order {
		id: Uuid::new_v4().to_string(),
		order_hash: Some(format_hash(&event.order_hash)),
		order_uid: None,
		owner: String::new(),
		handler: String::new(),
		sell_token: String::new(),
		buy_token: String::new(),
		receiver: String::new(),
		sell_amount: String::new(),
		min_buy_amount: String::new(),
		start_time: 0,
		end_time: 0,
		polymarket_order_hash: String::new(),
		app_data: String::new(),
		market_id: None,
		outcome_selected: None,
		bet_percentage: None,
		block_number: None,
		transaction_hash: None,
		log_index: None,
		fill: FillDetail::default(),
		status: OrderStatus::Live,
	};
	merge_chain_fields(&mut order, event);
	order
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::{Address, B256, U256};
	use keeper_storage::MemoryOrderRepository;
	use keeper_types::{BlockMeta, OrderParams};

	fn meta(block: u64, index: u64) -> BlockMeta {
		BlockMeta {
			block_number: block,
			transaction_hash: B256::repeat_byte(0x77),
			log_index: index,
		}
	}

	fn created_event(block: u64, index: u64) -> OrderCreatedEvent {
		let params = OrderParams {
			handler: Address::repeat_byte(0x42),
			salt: B256::repeat_byte(0x01),
			sell_token: Address::repeat_byte(0xaa),
			buy_token: Address::repeat_byte(0xbb),
			receiver: Address::repeat_byte(0xcc),
			sell_amount: U256::from(1_000_000u64),
			min_buy_amount: U256::from(1u64),
			start_time: 1_700_000_000,
			end_time: 1_701_000_000,
			polymarket_order_hash: B256::with_last_byte(1),
			app_data: B256::ZERO,
		};
		OrderCreatedEvent {
			owner: Address::repeat_byte(0xee),
			order_hash: B256::repeat_byte(0x33),
			params,
			meta: meta(block, index),
		}
	}

	fn trade_for(event: &OrderCreatedEvent, block: u64, index: u64) -> TradeEvent {
		let uid = pack_order_uid(
			&event.order_hash,
			&event.owner,
			event.params.end_time as u32,
		);
		TradeEvent {
			owner: event.owner,
			sell_token: event.params.sell_token,
			buy_token: event.params.buy_token,
			sell_amount: event.params.sell_amount,
			buy_amount: U256::from(3u64),
			fee_amount: U256::from(7u64),
			order_uid: uid.to_vec(),
			meta: meta(block, index),
		}
	}

	fn setup() -> (Arc<MemoryOrderRepository>, Reconciler) {
		let repo = Arc::new(MemoryOrderRepository::new());
		let reconciler = Reconciler::new(repo.clone());
		(repo, reconciler)
	}

	#[tokio::test]
	async fn creation_inserts_live_order_with_provenance() {
		let (repo, reconciler) = setup();
		let event = created_event(100, 2);

		reconciler.apply_order_created(&event).await.unwrap();

		let order = repo
			.get_by_hash(&format_hash(&event.order_hash))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(order.status, OrderStatus::Live);
		assert_eq!(order.block_number, Some(100));
		assert_eq!(order.log_index, Some(2));
		assert_eq!(order.sell_amount, "1000000");
		assert!(order.order_uid.is_some());
	}

	#[tokio::test]
	async fn creation_is_idempotent_under_replay() {
		let (repo, reconciler) = setup();
		let event = created_event(100, 2);

		reconciler.apply_order_created(&event).await.unwrap();
		let first = repo
			.get_by_hash(&format_hash(&event.order_hash))
			.await
			.unwrap()
			.unwrap();

		reconciler.apply_order_created(&event).await.unwrap();
		let second = repo
			.get_by_hash(&format_hash(&event.order_hash))
			.await
			.unwrap()
			.unwrap();

		assert_eq!(first.id, second.id);
		assert_eq!(first.status, second.status);
		assert_eq!(first.block_number, second.block_number);
		assert_eq!(first.log_index, second.log_index);
	}

	#[tokio::test]
	async fn creation_merges_into_existing_draft() {
		let (repo, reconciler) = setup();
		let event = created_event(100, 2);

		let draft = Order {
			id: "draft-1".to_string(),
			order_hash: Some(format_hash(&event.order_hash)),
			order_uid: None,
			owner: format_address(&event.owner),
			handler: String::new(),
			sell_token: String::new(),
			buy_token: String::new(),
			receiver: String::new(),
			sell_amount: "1000000".to_string(),
			min_buy_amount: "1".to_string(),
			start_time: 0,
			end_time: 0,
			polymarket_order_hash: String::new(),
			app_data: String::new(),
			market_id: Some("market-7".to_string()),
			outcome_selected: Some("yes".to_string()),
			bet_percentage: Some(25),
			block_number: None,
			transaction_hash: None,
			log_index: None,
			fill: FillDetail::default(),
			status: OrderStatus::Draft,
		};
		repo.insert_draft(draft).await.unwrap();

		reconciler.apply_order_created(&event).await.unwrap();

		let order = repo.get_by_id("draft-1").await.unwrap().unwrap();
		assert_eq!(order.status, OrderStatus::Live);
		assert_eq!(order.block_number, Some(100));
		// Business metadata from the draft survives the merge.
		assert_eq!(order.market_id.as_deref(), Some("market-7"));
		assert_eq!(order.bet_percentage, Some(25));
	}

	#[tokio::test]
	async fn trade_fills_live_order() {
		let (repo, reconciler) = setup();
		let created = created_event(100, 2);
		reconciler.apply_order_created(&created).await.unwrap();

		let trade = trade_for(&created, 110, 5);
		reconciler.apply_trade(&trade).await.unwrap();

		let order = repo
			.get_by_hash(&format_hash(&created.order_hash))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(order.status, OrderStatus::Filled);
		assert_eq!(order.fill.actual_sell_amount.as_deref(), Some("1000000"));
		assert_eq!(order.fill.actual_buy_amount.as_deref(), Some("3"));
		assert_eq!(order.fill.fee_amount.as_deref(), Some("7"));
		assert_eq!(order.fill.fill_block_number, Some(110));
	}

	#[tokio::test]
	async fn trade_for_unknown_order_is_a_noop() {
		let (_repo, reconciler) = setup();
		let created = created_event(100, 2);
		// Not applied: the trade references an order we never stored.
		let trade = trade_for(&created, 110, 5);

		reconciler.apply_trade(&trade).await.unwrap();
	}

	#[tokio::test]
	async fn trade_replay_does_not_double_apply() {
		let (repo, reconciler) = setup();
		let created = created_event(100, 2);
		reconciler.apply_order_created(&created).await.unwrap();

		let trade = trade_for(&created, 110, 5);
		reconciler.apply_trade(&trade).await.unwrap();
		// Second application hits the fill provenance guard, not the
		// status machine.
		reconciler.apply_trade(&trade).await.unwrap();

		let order = repo
			.get_by_hash(&format_hash(&created.order_hash))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(order.status, OrderStatus::Filled);
	}

	#[tokio::test]
	async fn invalidation_cancels_live_order() {
		let (repo, reconciler) = setup();
		let created = created_event(100, 2);
		reconciler.apply_order_created(&created).await.unwrap();

		let uid = pack_order_uid(
			&created.order_hash,
			&created.owner,
			created.params.end_time as u32,
		);
		let event = OrderInvalidatedEvent {
			owner: created.owner,
			order_uid: uid.to_vec(),
			meta: meta(120, 1),
		};
		reconciler.apply_order_invalidated(&event).await.unwrap();

		let order = repo
			.get_by_hash(&format_hash(&created.order_hash))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(order.status, OrderStatus::Canceled);
		assert_eq!(order.fill.fill_block_number, Some(120));
	}

	#[tokio::test]
	async fn invalidation_after_fill_is_skipped() {
		let (repo, reconciler) = setup();
		let created = created_event(100, 2);
		reconciler.apply_order_created(&created).await.unwrap();
		reconciler
			.apply_trade(&trade_for(&created, 110, 5))
			.await
			.unwrap();

		let uid = pack_order_uid(
			&created.order_hash,
			&created.owner,
			created.params.end_time as u32,
		);
		let event = OrderInvalidatedEvent {
			owner: created.owner,
			order_uid: uid.to_vec(),
			meta: meta(120, 1),
		};
		// Order is filled, not live: warning no-op rather than an error.
		reconciler.apply_order_invalidated(&event).await.unwrap();

		let order = repo
			.get_by_hash(&format_hash(&created.order_hash))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(order.status, OrderStatus::Filled);
	}

	#[tokio::test]
	async fn uid_backfill_covers_live_orders() {
		let (repo, reconciler) = setup();
		let event = created_event(100, 2);
		reconciler.apply_order_created(&event).await.unwrap();

		// Simulate an externally promoted order missing its UID.
		let hash = B256::repeat_byte(0x55);
		let mut order = order_from_event(&OrderCreatedEvent {
			order_hash: hash,
			..created_event(101, 0)
		});
		order.order_uid = None;
		repo.upsert_by_hash(order).await.unwrap();

		let derived = reconciler.backfill_missing_uids().await.unwrap();
		assert_eq!(derived, 1);
		assert!(repo
			.get_live_orders_missing_uid()
			.await
			.unwrap()
			.is_empty());

		let stored = repo.get_by_hash(&format_hash(&hash)).await.unwrap().unwrap();
		let uid = stored.order_uid.unwrap();
		// 56 bytes -> 112 hex chars plus the 0x prefix.
		assert_eq!(uid.len(), 2 + 112);
		assert!(uid.starts_with(&format_hash(&hash)));
	}
}
