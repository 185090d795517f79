//! Position reconciliation for the sell-side automation path.
//!
//! Merges an off-chain position feed with on-chain outcome-token balances
//! to decide what can actually be liquidated. The feed reports what the
//! market believes the wallet holds; the chain is authoritative, so each
//! planned amount is the smaller of the two. Every planned liquidation is
//! recorded as an audit draft order through the repository.

use alloy::primitives::{Address, U256};
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use keeper_chain::{ChainClient, ChainError};
use keeper_storage::{OrderRepository, StorageError};
use keeper_types::contracts::IERC20;
use keeper_types::{format_address, format_hash, FillDetail, Order, OrderStatus};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Outcome tokens carry six decimals.
const TOKEN_DECIMALS: u32 = 6;

/// Validity window stamped on audit drafts.
const AUDIT_WINDOW_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum PositionError {
	#[error("Feed error: {0}")]
	Feed(String),
	#[error("Invalid position size: {0}")]
	InvalidSize(String),
	#[error("Chain error: {0}")]
	Chain(#[from] ChainError),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// A position as reported by the off-chain feed.
#[derive(Debug, Clone)]
pub struct Position {
	pub market_id: String,
	pub outcome: String,
	/// Outcome token backing the position.
	pub token: Address,
	/// Reported size in human units, decimal string.
	pub size: String,
}

/// External collaborator supplying the off-chain position feed.
#[async_trait]
pub trait PositionFeed: Send + Sync {
	async fn positions(&self, owner: &Address) -> Result<Vec<Position>, PositionError>;
}

/// One planned liquidation.
#[derive(Debug, Clone)]
pub struct LiquidationItem {
	pub market_id: String,
	pub outcome: String,
	pub token: Address,
	/// Feed-reported size in base units.
	pub reported: U256,
	/// On-chain balance in base units.
	pub on_chain: U256,
	/// Amount to liquidate: the smaller of the two.
	pub amount: U256,
	/// Audit draft recorded for this item.
	pub audit_order_id: String,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Default)]
pub struct LiquidationPlan {
	pub items: Vec<LiquidationItem>,
	/// Positions dropped because nothing was actually held.
	pub skipped: usize,
}

/// Merges feed positions with on-chain balances into a liquidation plan.
pub struct PositionReconciler {
	client: Arc<dyn ChainClient>,
	feed: Arc<dyn PositionFeed>,
	repo: Arc<dyn OrderRepository>,
	/// Collateral token the liquidations buy back into.
	collateral: Address,
}

impl PositionReconciler {
	pub fn new(
		client: Arc<dyn ChainClient>,
		feed: Arc<dyn PositionFeed>,
		repo: Arc<dyn OrderRepository>,
		collateral: Address,
	) -> Self {
		Self {
			client,
			feed,
			repo,
			collateral,
		}
	}

	/// Builds the liquidation plan for `owner`, writing one audit draft per
	/// planned item.
	pub async fn reconcile(&self, owner: &Address) -> Result<LiquidationPlan, PositionError> {
		let positions = self.feed.positions(owner).await?;
		let mut plan = LiquidationPlan::default();

		for position in positions {
			let reported = to_base_units(&position.size)?;
			let on_chain = self.balance_of(position.token, *owner).await?;
			let amount = reported.min(on_chain);

			if amount.is_zero() {
				debug!(
					market_id = %position.market_id,
					outcome = %position.outcome,
					"Nothing to liquidate; skipping position"
				);
				plan.skipped += 1;
				continue;
			}

			let audit_order_id = self
				.write_audit_draft(owner, &position, amount)
				.await?;

			plan.items.push(LiquidationItem {
				market_id: position.market_id,
				outcome: position.outcome,
				token: position.token,
				reported,
				on_chain,
				amount,
				audit_order_id,
			});
		}

		info!(
			planned = plan.items.len(),
			skipped = plan.skipped,
			"Position reconciliation complete"
		);

		Ok(plan)
	}

	async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, PositionError> {
		let data = IERC20::balanceOfCall { owner }.abi_encode();
		let ret = self.client.call(token, data).await?;
		U256::abi_decode(&ret, true).map_err(|e| {
			PositionError::Chain(ChainError::Rpc(format!("Bad balance response: {}", e)))
		})
	}

	async fn write_audit_draft(
		&self,
		owner: &Address,
		position: &Position,
		amount: U256,
	) -> Result<String, PositionError> {
		let now = chrono::Utc::now().timestamp() as u64;
		let zero_word = format_hash(&alloy::primitives::B256::ZERO);

		let order = Order {
			id: Uuid::new_v4().to_string(),
			order_hash: None,
			order_uid: None,
			owner: format_address(owner),
			handler: format_address(&Address::ZERO),
			sell_token: format_address(&position.token),
			buy_token: format_address(&self.collateral),
			receiver: format_address(owner),
			sell_amount: amount.to_string(),
			min_buy_amount: "0".to_string(),
			start_time: now,
			end_time: now + AUDIT_WINDOW_SECS,
			polymarket_order_hash: zero_word.clone(),
			app_data: zero_word,
			market_id: Some(position.market_id.clone()),
			outcome_selected: Some(position.outcome.clone()),
			bet_percentage: None,
			block_number: None,
			transaction_hash: None,
			log_index: None,
			fill: FillDetail::default(),
			status: OrderStatus::Draft,
		};

		let id = order.id.clone();
		self.repo.insert_draft(order).await?;
		Ok(id)
	}
}

/// Converts a human-unit decimal size into base units without going
/// through floating point.
fn to_base_units(size: &str) -> Result<U256, PositionError> {
	let dec =
		Decimal::from_str(size).map_err(|_| PositionError::InvalidSize(size.to_string()))?;
	if dec.is_sign_negative() {
		return Err(PositionError::InvalidSize(size.to_string()));
	}

	let scale = Decimal::from(10u64.pow(TOKEN_DECIMALS));
	let scaled = dec
		.checked_mul(scale)
		.ok_or_else(|| PositionError::InvalidSize(size.to_string()))?;

	let units = scaled
		.trunc()
		.to_u128()
		.ok_or_else(|| PositionError::InvalidSize(size.to_string()))?;

	Ok(U256::from(units))
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::{Bytes, B256};
	use alloy::rpc::types::{Filter, Log};
	use keeper_storage::MemoryOrderRepository;
	use std::collections::HashMap;

	const OWNER: Address = Address::repeat_byte(0xee);
	const COLLATERAL: Address = Address::repeat_byte(0xc0);
	const TOKEN_YES: Address = Address::repeat_byte(0xa1);
	const TOKEN_NO: Address = Address::repeat_byte(0xa2);

	struct StubFeed {
		positions: Vec<Position>,
	}

	#[async_trait]
	impl PositionFeed for StubFeed {
		async fn positions(&self, _owner: &Address) -> Result<Vec<Position>, PositionError> {
			Ok(self.positions.clone())
		}
	}

	struct StubChain {
		balances: HashMap<Address, U256>,
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

		async fn call(&self, to: Address, _data: Vec<u8>) -> Result<Bytes, ChainError> {
			let balance = self.balances.get(&to).copied().unwrap_or(U256::ZERO);
			Ok(balance.abi_encode().into())
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

	fn position(market: &str, outcome: &str, token: Address, size: &str) -> Position {
		Position {
			market_id: market.to_string(),
			outcome: outcome.to_string(),
			token,
			size: size.to_string(),
		}
	}

	fn reconciler(
		positions: Vec<Position>,
		balances: HashMap<Address, U256>,
	) -> (Arc<MemoryOrderRepository>, PositionReconciler) {
		let repo = Arc::new(MemoryOrderRepository::new());
		let reconciler = PositionReconciler::new(
			Arc::new(StubChain { balances }),
			Arc::new(StubFeed { positions }),
			repo.clone(),
			COLLATERAL,
		);
		(repo, reconciler)
	}

	#[tokio::test]
	async fn plans_the_smaller_of_feed_and_chain() {
		let balances = HashMap::from([
			// Chain holds less than the feed reports.
			(TOKEN_YES, U256::from(4_000_000u64)),
			// Chain holds more than the feed reports.
			(TOKEN_NO, U256::from(9_000_000u64)),
		]);
		let positions = vec![
			position("m1", "yes", TOKEN_YES, "12.5"),
			position("m2", "no", TOKEN_NO, "2"),
		];
		let (_repo, reconciler) = reconciler(positions, balances);

		let plan = reconciler.reconcile(&OWNER).await.unwrap();
		assert_eq!(plan.items.len(), 2);
		assert_eq!(plan.skipped, 0);

		assert_eq!(plan.items[0].reported, U256::from(12_500_000u64));
		assert_eq!(plan.items[0].on_chain, U256::from(4_000_000u64));
		assert_eq!(plan.items[0].amount, U256::from(4_000_000u64));

		assert_eq!(plan.items[1].reported, U256::from(2_000_000u64));
		assert_eq!(plan.items[1].amount, U256::from(2_000_000u64));
	}

	#[tokio::test]
	async fn empty_holdings_are_skipped() {
		let positions = vec![
			position("m1", "yes", TOKEN_YES, "5"),
			position("m2", "no", TOKEN_NO, "0"),
		];
		// No balances at all on-chain.
		let (_repo, reconciler) = reconciler(positions, HashMap::new());

		let plan = reconciler.reconcile(&OWNER).await.unwrap();
		assert!(plan.items.is_empty());
		assert_eq!(plan.skipped, 2);
	}

	#[tokio::test]
	async fn writes_an_audit_draft_per_planned_item() {
		let balances = HashMap::from([(TOKEN_YES, U256::from(4_000_000u64))]);
		let positions = vec![position("m1", "yes", TOKEN_YES, "12.5")];
		let (repo, reconciler) = reconciler(positions, balances);

		let plan = reconciler.reconcile(&OWNER).await.unwrap();
		let audit = repo
			.get_by_id(&plan.items[0].audit_order_id)
			.await
			.unwrap()
			.unwrap();

		assert_eq!(audit.status, OrderStatus::Draft);
		assert_eq!(audit.sell_amount, "4000000");
		assert_eq!(audit.sell_token, format_address(&TOKEN_YES));
		assert_eq!(audit.buy_token, format_address(&COLLATERAL));
		assert_eq!(audit.market_id.as_deref(), Some("m1"));
		assert_eq!(audit.outcome_selected.as_deref(), Some("yes"));
	}

	#[tokio::test]
	async fn rejects_malformed_sizes() {
		let (_repo, reconciler) = reconciler(
			vec![position("m1", "yes", TOKEN_YES, "-3")],
			HashMap::new(),
		);
		let err = reconciler.reconcile(&OWNER).await.unwrap_err();
		assert!(matches!(err, PositionError::InvalidSize(_)));

		assert!(to_base_units("not-a-number").is_err());
		assert_eq!(to_base_units("0.0000019").unwrap(), U256::from(1u64));
	}
}
