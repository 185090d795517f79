//! Unsigned transaction descriptors handed to an external signer.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::order::format_address;

/// A single unsigned transaction in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStep {
	/// Target contract address, lower-cased hex.
	pub to: String,
	/// Calldata as a `0x`-prefixed hex string.
	pub data: String,
	/// Native value as a decimal string.
	pub value: String,
	/// Human-readable description of what this step does.
	pub summary: String,
}

impl TransactionStep {
	pub fn new(to: &Address, data: Vec<u8>, summary: impl Into<String>) -> Self {
		Self {
			to: format_address(to),
			data: format!("0x{}", hex::encode(data)),
			value: "0".to_string(),
			summary: summary.into(),
		}
	}
}

/// Ordered list of unsigned transactions plus a total gas estimate.
///
/// Step order is significant: wallet setup must land before the main
/// transaction can validate signatures, and approvals before settlement can
/// pull funds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionBatch {
	pub steps: Vec<TransactionStep>,
	pub gas_estimate: u64,
}
