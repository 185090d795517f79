//! ABI event decoding.
//!
//! Raw settlement logs become the closed [`DecodedEvent`] union through one
//! total decode function: either a typed event, `None` for creation events
//! belonging to a foreign handler, or an explicit decode error. No partially
//! decoded object ever leaves this module.

use alloy::primitives::{Address, Log as PrimLog, LogData, B256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use keeper_types::contracts::{
	conditional_order_hash, ConditionalOrderCreated, OrderInvalidated, Trade,
	STATIC_INPUT_WORDS, STATIC_INPUT_WORDS_LEGACY,
};
use keeper_types::{
	BlockMeta, DecodedEvent, OrderCreatedEvent, OrderInvalidatedEvent, OrderParams, TradeEvent,
	ORDER_UID_LEN,
};
use thiserror::Error;

/// Errors produced while decoding a single log. Fatal for that event only;
/// the poller logs and skips.
#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("Log is missing block metadata")]
	MissingBlockMeta,
	#[error("Log has no topics")]
	MissingTopics,
	#[error("Unrecognized event signature: {0}")]
	UnknownSignature(B256),
	#[error("Static input is {words} 32-byte fields, expected 8 or 9")]
	FieldCount { words: usize },
	#[error("Static input length {0} is not word-aligned")]
	Alignment(usize),
	#[error("Order UID is {0} bytes, expected {ORDER_UID_LEN}")]
	UidLength(usize),
	#[error("Malformed event payload: {0}")]
	Malformed(String),
}

/// Pure decoder for the three settlement event shapes.
#[derive(Debug, Clone)]
pub struct EventDecoder {
	/// Conditional-order handler this deployment cares about. Creation
	/// events for any other handler belong to unrelated integrations on the
	/// shared contracts and are dropped silently.
	handler: Address,
}

impl EventDecoder {
	pub fn new(handler: Address) -> Self {
		Self { handler }
	}

	/// Decodes a raw log into a domain event.
	///
	/// Returns `Ok(None)` for creation events whose handler is not ours.
	pub fn decode(&self, log: &Log) -> Result<Option<DecodedEvent>, DecodeError> {
		let meta = block_meta(log)?;
		let topic0 = log
			.topics()
			.first()
			.copied()
			.ok_or(DecodeError::MissingTopics)?;

		let prim = PrimLog {
			address: log.address(),
			data: LogData::new_unchecked(log.topics().to_vec(), log.data().data.clone()),
		};

		if topic0 == ConditionalOrderCreated::SIGNATURE_HASH {
			self.decode_order_created(&prim, meta)
		} else if topic0 == Trade::SIGNATURE_HASH {
			decode_trade(&prim, meta).map(Some)
		} else if topic0 == OrderInvalidated::SIGNATURE_HASH {
			decode_order_invalidated(&prim, meta).map(Some)
		} else {
			Err(DecodeError::UnknownSignature(topic0))
		}
	}

	fn decode_order_created(
		&self,
		log: &PrimLog,
		meta: BlockMeta,
	) -> Result<Option<DecodedEvent>, DecodeError> {
		let event = ConditionalOrderCreated::decode_log(log, true)
			.map_err(|e| DecodeError::Malformed(e.to_string()))?;

		if event.params.handler != self.handler {
			return Ok(None);
		}

		let order_hash = conditional_order_hash(&event.params);
		let params = decode_static_input(
			event.params.handler,
			event.params.salt,
			&event.params.staticInput,
		)?;

		Ok(Some(DecodedEvent::OrderCreated(OrderCreatedEvent {
			owner: event.owner,
			order_hash,
			params,
			meta,
		})))
	}
}

/// Parses the opaque static-input blob. The word count determines the
/// format: 8 packed fields (legacy, no tag) or 9 (tag included). Anything
/// else is a decode error.
fn decode_static_input(
	handler: Address,
	salt: B256,
	blob: &[u8],
) -> Result<OrderParams, DecodeError> {
	if blob.len() % 32 != 0 {
		return Err(DecodeError::Alignment(blob.len()));
	}

	let words = blob.len() / 32;
	if words != STATIC_INPUT_WORDS && words != STATIC_INPUT_WORDS_LEGACY {
		return Err(DecodeError::FieldCount { words });
	}

	let word = |i: usize| B256::from_slice(&blob[i * 32..(i + 1) * 32]);
	let amount = |i: usize| alloy::primitives::U256::from_be_bytes(word(i).0);

	Ok(OrderParams {
		handler,
		salt,
		sell_token: Address::from_word(word(0)),
		buy_token: Address::from_word(word(1)),
		receiver: Address::from_word(word(2)),
		sell_amount: amount(3),
		min_buy_amount: amount(4),
		start_time: word_to_timestamp(word(5)),
		end_time: word_to_timestamp(word(6)),
		polymarket_order_hash: word(7),
		// Legacy blobs carry no tag; substitute the zero sentinel.
		app_data: if words == STATIC_INPUT_WORDS {
			word(8)
		} else {
			B256::ZERO
		},
	})
}

fn word_to_timestamp(word: B256) -> u64 {
	alloy::primitives::U256::from_be_bytes(word.0).saturating_to::<u64>()
}

fn decode_trade(log: &PrimLog, meta: BlockMeta) -> Result<DecodedEvent, DecodeError> {
	let event =
		Trade::decode_log(log, true).map_err(|e| DecodeError::Malformed(e.to_string()))?;

	if event.orderUid.len() != ORDER_UID_LEN {
		return Err(DecodeError::UidLength(event.orderUid.len()));
	}

	Ok(DecodedEvent::Trade(TradeEvent {
		owner: event.owner,
		sell_token: event.sellToken,
		buy_token: event.buyToken,
		sell_amount: event.sellAmount,
		buy_amount: event.buyAmount,
		fee_amount: event.feeAmount,
		order_uid: event.orderUid.to_vec(),
		meta,
	}))
}

fn decode_order_invalidated(log: &PrimLog, meta: BlockMeta) -> Result<DecodedEvent, DecodeError> {
	let event = OrderInvalidated::decode_log(log, true)
		.map_err(|e| DecodeError::Malformed(e.to_string()))?;

	if event.orderUid.len() != ORDER_UID_LEN {
		return Err(DecodeError::UidLength(event.orderUid.len()));
	}

	Ok(DecodedEvent::OrderInvalidated(OrderInvalidatedEvent {
		owner: event.owner,
		order_uid: event.orderUid.to_vec(),
		meta,
	}))
}

fn block_meta(log: &Log) -> Result<BlockMeta, DecodeError> {
	match (log.block_number, log.transaction_hash, log.log_index) {
		(Some(block_number), Some(transaction_hash), Some(log_index)) => Ok(BlockMeta {
			block_number,
			transaction_hash,
			log_index,
		}),
		_ => Err(DecodeError::MissingBlockMeta),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::U256;
	use alloy::sol_types::SolEvent;
	use keeper_types::contracts::ConditionalOrderParams;
	use keeper_types::pack_order_uid;

	const HANDLER: Address = Address::repeat_byte(0x42);

	fn rpc_log(address: Address, data: LogData, block: u64, index: u64) -> Log {
		Log {
			inner: PrimLog { address, data },
			block_number: Some(block),
			transaction_hash: Some(B256::repeat_byte(0x77)),
			log_index: Some(index),
			..Default::default()
		}
	}

	fn sample_params(app_data: Option<B256>) -> OrderParams {
		OrderParams {
			handler: HANDLER,
			salt: B256::repeat_byte(0x01),
			sell_token: Address::repeat_byte(0xaa),
			buy_token: Address::repeat_byte(0xbb),
			receiver: Address::repeat_byte(0xcc),
			sell_amount: U256::from(1_000_000u64),
			min_buy_amount: U256::from(1u64),
			start_time: 1_700_000_000,
			end_time: 1_701_000_000,
			polymarket_order_hash: B256::with_last_byte(1),
			app_data: app_data.unwrap_or(B256::ZERO),
		}
	}

	fn created_log(params: &OrderParams, static_input: Vec<u8>, block: u64, index: u64) -> Log {
		let event = ConditionalOrderCreated {
			owner: Address::repeat_byte(0xee),
			params: ConditionalOrderParams {
				handler: params.handler,
				salt: params.salt,
				staticInput: static_input.into(),
			},
		};
		rpc_log(
			Address::repeat_byte(0x10),
			event.encode_log_data(),
			block,
			index,
		)
	}

	#[test]
	fn decodes_current_format_blob() {
		let decoder = EventDecoder::new(HANDLER);
		let params = sample_params(Some(B256::repeat_byte(0x09)));
		let log = created_log(&params, params.encode_static_input(), 100, 2);

		let decoded = decoder.decode(&log).unwrap().unwrap();
		let DecodedEvent::OrderCreated(event) = decoded else {
			panic!("expected OrderCreated");
		};

		assert_eq!(event.params, params);
		assert_eq!(event.meta.block_number, 100);
		assert_eq!(event.meta.log_index, 2);
		assert_eq!(
			event.order_hash,
			conditional_order_hash(&params.to_envelope())
		);
	}

	#[test]
	fn legacy_blob_gets_zero_sentinel_tag() {
		let decoder = EventDecoder::new(HANDLER);
		let params = sample_params(None);

		// Drop the trailing tag word to produce the 8-field legacy format.
		let mut blob = params.encode_static_input();
		blob.truncate(8 * 32);

		let decoded = decoder.decode(&created_log(&params, blob, 5, 0)).unwrap();
		let Some(DecodedEvent::OrderCreated(event)) = decoded else {
			panic!("expected OrderCreated");
		};

		assert_eq!(event.params.app_data, B256::ZERO);
		assert_eq!(event.params.sell_token, params.sell_token);
		assert_eq!(event.params.sell_amount, params.sell_amount);
	}

	#[test]
	fn round_trips_address_and_amount_fields() {
		// Decoding an 8- or 9-field blob and re-encoding with the tag
		// normalized to the sentinel reproduces the economic fields exactly.
		let decoder = EventDecoder::new(HANDLER);
		for words in [8usize, 9] {
			let params = sample_params(None);
			let mut blob = params.encode_static_input();
			blob.truncate(words * 32);

			let decoded = decoder
				.decode(&created_log(&params, blob, 1, 1))
				.unwrap()
				.unwrap();
			let DecodedEvent::OrderCreated(event) = decoded else {
				panic!("expected OrderCreated");
			};

			assert_eq!(event.params.encode_static_input(), params.encode_static_input());
		}
	}

	#[test]
	fn rejects_unexpected_field_counts() {
		let decoder = EventDecoder::new(HANDLER);
		let params = sample_params(None);

		for words in [0usize, 7, 10] {
			let blob = vec![0u8; words * 32];
			let err = decoder
				.decode(&created_log(&params, blob, 1, 1))
				.unwrap_err();
			assert!(matches!(err, DecodeError::FieldCount { .. }), "{} words", words);
		}

		let err = decoder
			.decode(&created_log(&params, vec![0u8; 100], 1, 1))
			.unwrap_err();
		assert!(matches!(err, DecodeError::Alignment(100)));
	}

	#[test]
	fn foreign_handler_is_dropped_silently() {
		let decoder = EventDecoder::new(Address::repeat_byte(0x99));
		let params = sample_params(None);
		let log = created_log(&params, params.encode_static_input(), 1, 1);

		assert!(decoder.decode(&log).unwrap().is_none());
	}

	#[test]
	fn decodes_trade_event() {
		let decoder = EventDecoder::new(HANDLER);
		let owner = Address::repeat_byte(0xee);
		let uid = pack_order_uid(&B256::repeat_byte(0x33), &owner, 1_701_000_000);

		let event = Trade {
			owner,
			sellToken: Address::repeat_byte(0xaa),
			buyToken: Address::repeat_byte(0xbb),
			sellAmount: U256::from(1_000_000u64),
			buyAmount: U256::from(3u64),
			feeAmount: U256::from(7u64),
			orderUid: uid.to_vec().into(),
		};
		let log = rpc_log(Address::repeat_byte(0x20), event.encode_log_data(), 101, 4);

		let DecodedEvent::Trade(trade) = decoder.decode(&log).unwrap().unwrap() else {
			panic!("expected Trade");
		};
		assert_eq!(trade.order_uid, uid.to_vec());
		assert_eq!(trade.sell_amount, U256::from(1_000_000u64));
		assert_eq!(trade.meta.block_number, 101);
	}

	#[test]
	fn rejects_trade_with_short_uid() {
		let decoder = EventDecoder::new(HANDLER);
		let event = Trade {
			owner: Address::repeat_byte(0xee),
			sellToken: Address::repeat_byte(0xaa),
			buyToken: Address::repeat_byte(0xbb),
			sellAmount: U256::ZERO,
			buyAmount: U256::ZERO,
			feeAmount: U256::ZERO,
			orderUid: vec![0u8; 32].into(),
		};
		let log = rpc_log(Address::repeat_byte(0x20), event.encode_log_data(), 1, 1);

		assert!(matches!(
			decoder.decode(&log).unwrap_err(),
			DecodeError::UidLength(32)
		));
	}

	#[test]
	fn missing_block_metadata_is_an_error() {
		let decoder = EventDecoder::new(HANDLER);
		let params = sample_params(None);
		let mut log = created_log(&params, params.encode_static_input(), 1, 1);
		log.block_number = None;

		assert!(matches!(
			decoder.decode(&log).unwrap_err(),
			DecodeError::MissingBlockMeta
		));
	}
}
