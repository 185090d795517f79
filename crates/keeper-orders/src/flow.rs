//! Draft order creation, cancellation, and confirmation.
//!
//! Ties the hash/UID calculator, the batch builder, and the order
//! repository together for the request flow: the caller receives a
//! persisted draft plus the unsigned batch, signs externally, then reports
//! the transaction hash back through `confirm_submitted`. The draft goes
//! fully live when the poller observes the creation event on-chain.

use crate::batch::BatchBuilder;
use crate::encoder;
use crate::uid::UidCalculator;
use crate::OrderFlowError;
use alloy::primitives::{Address, B256, U256};
use keeper_storage::OrderRepository;
use keeper_types::{
	format_address, format_hash, parse_address, parse_hash, FillDetail, Order, OrderParams,
	OrderStatus, TransactionBatch,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Caller-supplied parameters for a new draft order. The HTTP layer that
/// feeds this sits outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
	pub owner: Address,
	pub sell_token: Address,
	pub buy_token: Address,
	pub receiver: Address,
	pub sell_amount: U256,
	pub min_buy_amount: U256,
	pub start_time: u64,
	pub end_time: u64,
	/// Linked prediction-market order, when already known.
	pub polymarket_order_hash: Option<B256>,
	pub app_data: Option<B256>,
	pub market_id: Option<String>,
	pub outcome_selected: Option<String>,
	pub bet_percentage: Option<u8>,
}

/// Order creation/cancellation service.
pub struct OrderFlow {
	repo: Arc<dyn OrderRepository>,
	uid: UidCalculator,
	batch: BatchBuilder,
	/// Conditional-order handler stamped into every created order.
	handler: Address,
}

impl OrderFlow {
	pub fn new(
		repo: Arc<dyn OrderRepository>,
		uid: UidCalculator,
		batch: BatchBuilder,
		handler: Address,
	) -> Self {
		Self {
			repo,
			uid,
			batch,
			handler,
		}
	}

	/// Creates a draft order and its creation batch.
	///
	/// Hash and UID are computed before anything is persisted; a failure
	/// there aborts the whole operation with no partial state.
	pub async fn create_order(
		&self,
		request: CreateOrderRequest,
	) -> Result<(Order, TransactionBatch), OrderFlowError> {
		if request.end_time <= request.start_time {
			return Err(OrderFlowError::ValidationFailed(
				"end_time must be after start_time".to_string(),
			));
		}
		if request.sell_amount.is_zero() {
			return Err(OrderFlowError::ValidationFailed(
				"sell_amount must be positive".to_string(),
			));
		}

		let params = OrderParams {
			handler: self.handler,
			salt: encoder::fresh_salt(),
			sell_token: request.sell_token,
			buy_token: request.buy_token,
			receiver: request.receiver,
			sell_amount: request.sell_amount,
			min_buy_amount: request.min_buy_amount,
			start_time: request.start_time,
			end_time: request.end_time,
			polymarket_order_hash: request.polymarket_order_hash.unwrap_or(B256::ZERO),
			app_data: request.app_data.unwrap_or(B256::ZERO),
		};

		let hash = self.uid.compute_order_hash(&params).await?;
		let order_uid = self
			.uid
			.compute_order_uid(&hash, &request.owner, params.end_time as u32);

		let batch = self.batch.build_create_batch(request.owner, &params).await?;

		let order = Order {
			id: Uuid::new_v4().to_string(),
			order_hash: Some(format_hash(&hash)),
			order_uid: Some(format!("0x{}", hex::encode(order_uid))),
			owner: format_address(&request.owner),
			handler: format_address(&params.handler),
			sell_token: format_address(&params.sell_token),
			buy_token: format_address(&params.buy_token),
			receiver: format_address(&params.receiver),
			sell_amount: params.sell_amount.to_string(),
			min_buy_amount: params.min_buy_amount.to_string(),
			start_time: params.start_time,
			end_time: params.end_time,
			polymarket_order_hash: format_hash(&params.polymarket_order_hash),
			app_data: format_hash(&params.app_data),
			market_id: request.market_id,
			outcome_selected: request.outcome_selected,
			bet_percentage: request.bet_percentage,
			block_number: None,
			transaction_hash: None,
			log_index: None,
			fill: FillDetail::default(),
			status: OrderStatus::Draft,
		};

		self.repo.insert_draft(order.clone()).await?;
		info!(order_id = %order.id, order_hash = ?order.order_hash, "Created draft order");

		Ok((order, batch))
	}

	/// Builds the cancellation batch for a stored order.
	pub async fn cancel_order(&self, id: &str) -> Result<TransactionBatch, OrderFlowError> {
		let order = self
			.repo
			.get_by_id(id)
			.await?
			.ok_or_else(|| OrderFlowError::NotFound(id.to_string()))?;

		if !matches!(order.status, OrderStatus::Draft | OrderStatus::Live) {
			return Err(OrderFlowError::ValidationFailed(format!(
				"Order {} is {}, not cancellable",
				id, order.status
			)));
		}

		let hash_str = order.order_hash.as_ref().ok_or_else(|| {
			OrderFlowError::ValidationFailed(format!("Order {} has no hash yet", id))
		})?;
		let hash = parse_hash(hash_str)
			.map_err(|e| OrderFlowError::ValidationFailed(e.to_string()))?;
		let owner = parse_address(&order.owner)
			.map_err(|e| OrderFlowError::ValidationFailed(e.to_string()))?;

		Ok(self.batch.build_cancel_batch(owner, &hash).await?)
	}

	/// Marks a draft live once the caller reports the signed creation
	/// transaction hash.
	pub async fn confirm_submitted(
		&self,
		id: &str,
		tx_hash: &str,
	) -> Result<Order, OrderFlowError> {
		let mut order = self
			.repo
			.get_by_id(id)
			.await?
			.ok_or_else(|| OrderFlowError::NotFound(id.to_string()))?;

		if order.status != OrderStatus::Draft {
			return Err(OrderFlowError::ValidationFailed(format!(
				"Order {} is {}, expected draft",
				id, order.status
			)));
		}

		order.transaction_hash = Some(tx_hash.to_string());
		order.status = OrderStatus::Live;
		self.repo.upsert_by_hash(order.clone()).await?;

		info!(order_id = %id, tx_hash, "Draft order confirmed live");
		Ok(order)
	}
}
