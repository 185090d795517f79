//! Batch transaction assembly.
//!
//! Composes, in strict order, only the steps a wallet actually needs:
//! fallback-handler setup, domain-verifier setup (only together with the
//! former), sell-token approval, then the main transaction. Wallet setup
//! must land before the main transaction can validate signatures produced
//! under the new handler; the approval must land before settlement can pull
//! funds.

use crate::encoder;
use alloy::primitives::{b256, Address, B256, U256};
use alloy::sol_types::{SolCall, SolValue};
use keeper_chain::{ChainClient, ChainError};
use keeper_types::contracts::{IERC20, ISafe, ISignatureVerifierMuxer};
use keeper_types::{OrderParams, TransactionBatch, TransactionStep};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Wallet storage slot holding the fallback handler address:
/// `keccak256("fallback_manager.handler.address")`.
const FALLBACK_HANDLER_SLOT: B256 =
	b256!("6c9a6c4a39284e37ed1cf53d337577d14212a4870fb976a4366c693b939918d5");

/// Conservative defaults used when simulation fails: a wallet not yet
/// configured with its handler cannot accurately simulate later steps in
/// the same batch.
const DEFAULT_APPROVAL_GAS: u64 = 65_000;
const DEFAULT_CALL_GAS: u64 = 200_000;

/// Errors surfaced by batch assembly, structured so the caller can present
/// an actionable message.
#[derive(Debug, Error)]
pub enum BatchError {
	#[error("Insufficient balance: required {required}, available {available}")]
	InsufficientBalance { required: U256, available: U256 },
	#[error("Gas estimation failed: {0}")]
	Estimation(String),
	#[error("Chain error: {0}")]
	Chain(#[from] ChainError),
}

/// Addresses the batch builder needs beyond the order itself.
#[derive(Debug, Clone)]
pub struct BatchConfig {
	pub registry: Address,
	pub vault_relayer: Address,
	pub fallback_handler: Address,
	pub domain_verifier: Address,
	pub domain_separator: B256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKind {
	WalletSetup,
	Approval,
	Main,
}

struct PlannedStep {
	to: Address,
	data: Vec<u8>,
	kind: StepKind,
	summary: &'static str,
}

/// Assembles ordered transaction batches for order creation and
/// cancellation.
pub struct BatchBuilder {
	client: Arc<dyn ChainClient>,
	config: BatchConfig,
}

impl BatchBuilder {
	pub fn new(client: Arc<dyn ChainClient>, config: BatchConfig) -> Self {
		Self { client, config }
	}

	/// Builds the creation batch for `owner`. Validates the owner's sell
	/// token balance before assembling anything.
	pub async fn build_create_batch(
		&self,
		owner: Address,
		params: &OrderParams,
	) -> Result<TransactionBatch, BatchError> {
		let balance = self.erc20_balance(params.sell_token, owner).await?;
		if balance < params.sell_amount {
			return Err(BatchError::InsufficientBalance {
				required: params.sell_amount,
				available: balance,
			});
		}

		let mut planned = Vec::new();

		let needs_handler = self.needs_fallback_handler(owner).await?;
		if needs_handler {
			planned.push(PlannedStep {
				to: owner,
				data: ISafe::setFallbackHandlerCall {
					handler: self.config.fallback_handler,
				}
				.abi_encode(),
				kind: StepKind::WalletSetup,
				summary: "Install wallet fallback handler",
			});
			// The verifier registration goes through the handler installed
			// by the previous step, so it only ever appears alongside it.
			planned.push(PlannedStep {
				to: owner,
				data: ISignatureVerifierMuxer::setDomainVerifierCall {
					domainSeparator: self.config.domain_separator,
					newVerifier: self.config.domain_verifier,
				}
				.abi_encode(),
				kind: StepKind::WalletSetup,
				summary: "Register settlement domain verifier",
			});
		}

		let allowance = self.erc20_allowance(params.sell_token, owner).await?;
		if allowance < params.sell_amount {
			planned.push(PlannedStep {
				to: params.sell_token,
				data: IERC20::approveCall {
					spender: self.config.vault_relayer,
					amount: params.sell_amount,
				}
				.abi_encode(),
				kind: StepKind::Approval,
				summary: "Approve sell token for settlement",
			});
		}

		planned.push(PlannedStep {
			to: self.config.registry,
			data: encoder::create_call_data(params),
			kind: StepKind::Main,
			summary: "Create conditional order",
		});

		self.finalize(owner, planned, needs_handler).await
	}

	/// Builds the cancellation batch: a single `remove` call. The wallet is
	/// already configured if the order exists, so estimation failures are
	/// surfaced rather than defaulted.
	pub async fn build_cancel_batch(
		&self,
		owner: Address,
		order_hash: &B256,
	) -> Result<TransactionBatch, BatchError> {
		let data = encoder::cancel_call_data(order_hash);

		let gas = self
			.client
			.estimate_gas(owner, self.config.registry, data)
			.await
			.map_err(|e| BatchError::Estimation(e.to_string()))?;

		Ok(TransactionBatch {
			steps: vec![encoder::build_cancel_transaction(
				&self.config.registry,
				order_hash,
			)],
			gas_estimate: gas,
		})
	}

	/// Estimates gas per step and materializes the final batch. Setup and
	/// main steps fall back to conservative defaults while wallet setup is
	/// pending; a lone main step that cannot be simulated is an error.
	async fn finalize(
		&self,
		owner: Address,
		planned: Vec<PlannedStep>,
		setup_pending: bool,
	) -> Result<TransactionBatch, BatchError> {
		let mut total_gas = 0u64;
		let mut steps = Vec::with_capacity(planned.len());

		for step in planned {
			let estimate = self
				.client
				.estimate_gas(owner, step.to, step.data.clone())
				.await;

			let gas = match estimate {
				Ok(gas) => gas,
				Err(e) => match step.kind {
					StepKind::Approval => {
						debug!(error = %e, "Approval simulation failed; using default");
						DEFAULT_APPROVAL_GAS
					}
					StepKind::WalletSetup => {
						debug!(error = %e, "Setup simulation failed; using default");
						DEFAULT_CALL_GAS
					}
					StepKind::Main if setup_pending => {
						debug!(
							error = %e,
							"Main simulation failed before wallet setup; using default"
						);
						DEFAULT_CALL_GAS
					}
					StepKind::Main => {
						warn!(error = %e, "Main transaction simulation failed");
						return Err(BatchError::Estimation(e.to_string()));
					}
				},
			};

			total_gas = total_gas.saturating_add(gas);
			steps.push(TransactionStep::new(&step.to, step.data, step.summary));
		}

		Ok(TransactionBatch {
			steps,
			gas_estimate: total_gas,
		})
	}

	/// True when the wallet's fallback-handler storage slot does not hold
	/// the expected extensible handler.
	async fn needs_fallback_handler(&self, owner: Address) -> Result<bool, BatchError> {
		let word = self
			.client
			.storage_at(owner, U256::from_be_bytes(FALLBACK_HANDLER_SLOT.0))
			.await?;
		let current = Address::from_word(word);
		Ok(current != self.config.fallback_handler)
	}

	async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256, BatchError> {
		let data = IERC20::balanceOfCall { owner }.abi_encode();
		let ret = self.client.call(token, data).await?;
		U256::abi_decode(&ret, true)
			.map_err(|e| BatchError::Chain(ChainError::Rpc(format!("Bad balance response: {}", e))))
	}

	async fn erc20_allowance(&self, token: Address, owner: Address) -> Result<U256, BatchError> {
		let data = IERC20::allowanceCall {
			owner,
			spender: self.config.vault_relayer,
		}
		.abi_encode();
		let ret = self.client.call(token, data).await?;
		U256::abi_decode(&ret, true).map_err(|e| {
			BatchError::Chain(ChainError::Rpc(format!("Bad allowance response: {}", e)))
		})
	}
}
