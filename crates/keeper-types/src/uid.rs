//! Protocol order UID packing.
//!
//! The UID is not a hash: it is a fixed-layout 56-byte concatenation of
//! order hash, owner address, and expiry. The layout must be reproduced
//! bit-exactly because settlement events reference orders by it.

use alloy::primitives::{Address, B256};

/// Total UID length: 32-byte hash, 20-byte owner, 4-byte validTo.
pub const ORDER_UID_LEN: usize = 56;

/// Packs an order UID: bytes 0-31 hash, 32-51 owner, 52-55 big-endian
/// `valid_to`.
pub fn pack_order_uid(hash: &B256, owner: &Address, valid_to: u32) -> [u8; ORDER_UID_LEN] {
	let mut uid = [0u8; ORDER_UID_LEN];
	uid[0..32].copy_from_slice(hash.as_slice());
	uid[32..52].copy_from_slice(owner.as_slice());
	uid[52..56].copy_from_slice(&valid_to.to_be_bytes());
	uid
}

/// Splits a UID back into its components. Returns `None` unless the input
/// is exactly 56 bytes.
pub fn split_order_uid(uid: &[u8]) -> Option<(B256, Address, u32)> {
	if uid.len() != ORDER_UID_LEN {
		return None;
	}
	let hash = B256::from_slice(&uid[0..32]);
	let owner = Address::from_slice(&uid[32..52]);
	let valid_to = u32::from_be_bytes([uid[52], uid[53], uid[54], uid[55]]);
	Some((hash, owner, valid_to))
}
