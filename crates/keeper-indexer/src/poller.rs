//! Chain poller and backfill processor.
//!
//! Drives block-range log queries: a historical catch-up pass from the
//! persisted cursor to the chain head, then fixed-interval polling. Backfill
//! and polling share one range-processing path, so exactly one code path
//! ever advances the cursor, and the cursor only advances after a range has
//! fully succeeded.
//!
//! Failure policy: a failed range freezes the cursor (later ranges in the
//! same pass are still processed, which replay safely thanks to reconciler
//! idempotency) and is retried on subsequent passes. After
//! `max_range_attempts` passes the range is parked: logged at error level
//! and no longer blocking the cursor. Provider-level failures tear down and
//! recreate the node connection with exponential backoff.

use crate::decoder::EventDecoder;
use crate::reconciler::{ReconcileError, Reconciler};
use alloy::primitives::Address;
use alloy::rpc::types::Filter;
use alloy::sol_types::SolEvent;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use keeper_chain::{ChainClient, ChainError};
use keeper_storage::{OrderRepository, StorageError};
use keeper_types::contracts::{ConditionalOrderCreated, OrderInvalidated, Trade};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum PollerError {
	#[error("Poller is already running")]
	AlreadyRunning,
	#[error("Chain error: {0}")]
	Chain(#[from] ChainError),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
	#[error("Reconcile error: {0}")]
	Reconcile(#[from] ReconcileError),
}

/// Poller settings, taken from the indexer configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
	/// Minimum starting block; the persisted cursor is clamped to this.
	pub start_block: u64,
	/// Block-range size for backfill and polling queries.
	pub batch_size: u64,
	/// Polling interval.
	pub poll_interval: Duration,
	/// Passes a failing range is retried before it is parked.
	pub max_range_attempts: u32,
}

/// Structured outcome of a backfill pass. Callers and tests can assert on
/// partial failure instead of scraping logs.
#[derive(Debug, Default)]
pub struct BackfillReport {
	pub succeeded: Vec<(u64, u64)>,
	pub failed: Vec<(u64, u64)>,
}

/// Interval-driven poller owning the processed-block cursor.
pub struct ChainPoller {
	client: Arc<dyn ChainClient>,
	repo: Arc<dyn OrderRepository>,
	reconciler: Arc<Reconciler>,
	decoder: EventDecoder,
	/// Contracts whose logs we query: the settlement contract and the
	/// conditional-order registry.
	contract_addresses: Vec<Address>,
	config: PollerConfig,
	is_running: Arc<AtomicBool>,
	/// Set by `stop`; checked between ranges so a long backfill pass winds
	/// down promptly.
	stop_requested: Arc<AtomicBool>,
	stop_signal: Arc<tokio::sync::Mutex<Option<mpsc::Sender<()>>>>,
	/// Failure counts per block range, shared across passes.
	range_attempts: Arc<Mutex<HashMap<(u64, u64), u32>>>,
}

impl Clone for ChainPoller {
	fn clone(&self) -> Self {
		Self {
			client: self.client.clone(),
			repo: self.repo.clone(),
			reconciler: self.reconciler.clone(),
			decoder: self.decoder.clone(),
			contract_addresses: self.contract_addresses.clone(),
			config: self.config.clone(),
			is_running: self.is_running.clone(),
			stop_requested: self.stop_requested.clone(),
			stop_signal: self.stop_signal.clone(),
			range_attempts: self.range_attempts.clone(),
		}
	}
}

impl ChainPoller {
	pub fn new(
		client: Arc<dyn ChainClient>,
		repo: Arc<dyn OrderRepository>,
		reconciler: Arc<Reconciler>,
		decoder: EventDecoder,
		settlement: Address,
		registry: Address,
		config: PollerConfig,
	) -> Self {
		Self {
			client,
			repo,
			reconciler,
			decoder,
			contract_addresses: vec![settlement, registry],
			config,
			is_running: Arc::new(AtomicBool::new(false)),
			stop_requested: Arc::new(AtomicBool::new(false)),
			stop_signal: Arc::new(tokio::sync::Mutex::new(None)),
			range_attempts: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	/// Starts the poller: one backfill pass to the head observed at start,
	/// then interval polling until `stop` is called.
	pub async fn start(&self) -> Result<(), PollerError> {
		if self
			.is_running
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.is_err()
		{
			return Err(PollerError::AlreadyRunning);
		}
		self.stop_requested.store(false, Ordering::SeqCst);

		let (stop_tx, stop_rx) = mpsc::channel(1);
		*self.stop_signal.lock().await = Some(stop_tx);

		let poller = self.clone();
		tokio::spawn(async move {
			poller.run_loop(stop_rx).await;
		});

		Ok(())
	}

	/// Clears the running flag and cancels the polling timer. In-flight
	/// network calls complete but their results are discarded.
	pub async fn stop(&self) {
		if !self.is_running.swap(false, Ordering::SeqCst) {
			return;
		}
		self.stop_requested.store(true, Ordering::SeqCst);

		if let Some(stop_tx) = self.stop_signal.lock().await.take() {
			let _ = stop_tx.send(()).await;
		}

		info!("Poller stopped");
	}

	async fn run_loop(&self, mut stop_rx: mpsc::Receiver<()>) {
		match self.run_backfill().await {
			Ok(report) => {
				info!(
					succeeded = report.succeeded.len(),
					failed = report.failed.len(),
					"Backfill pass complete"
				);
			}
			Err(e) => {
				warn!(error = %e, "Backfill pass aborted; polling will catch up");
			}
		}

		let mut interval = tokio::time::interval(self.config.poll_interval);
		// A cycle still in flight when the timer fires again is skipped,
		// never overlapped.
		interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

		let mut reconnect_backoff = ExponentialBackoff {
			max_elapsed_time: None,
			..ExponentialBackoff::default()
		};

		loop {
			tokio::select! {
				_ = interval.tick() => {
					if !self.is_running.load(Ordering::SeqCst) {
						break;
					}

					match self.poll_once().await {
						Ok(()) => {
							reconnect_backoff.reset();
						}
						Err(PollerError::Chain(e)) => {
							let delay = reconnect_backoff
								.next_backoff()
								.unwrap_or(Duration::from_secs(60));
							warn!(
								error = %e,
								delay_ms = delay.as_millis() as u64,
								"Provider failure; recreating connection"
							);
							tokio::time::sleep(delay).await;
							if let Err(e) = self.client.reconnect().await {
								warn!(error = %e, "Reconnect failed; will retry");
							}
						}
						Err(e) => {
							warn!(error = %e, "Polling cycle failed; range will be retried");
						}
					}
				}
				_ = stop_rx.recv() => {
					break;
				}
			}
		}
	}

	/// Processes historical ranges from the cursor to the chain head
	/// observed at the start of the pass.
	pub async fn run_backfill(&self) -> Result<BackfillReport, PollerError> {
		let head = self.client.block_number().await?;
		let mut base = self.cursor_base().await?;
		let mut report = BackfillReport::default();

		if base >= head {
			return Ok(report);
		}

		info!(from = base + 1, to = head, "Starting backfill");

		// Once a range fails, later ranges still get processed for eventual
		// completeness, but the cursor stays frozen before the failure so
		// the next pass picks it up again.
		let mut cursor_frozen = false;

		while base < head {
			if self.stop_requested.load(Ordering::SeqCst) {
				break;
			}

			let from = base + 1;
			let to = (base + self.config.batch_size).min(head);

			match self.process_range(from, to).await {
				Ok(()) => {
					self.clear_attempts(from, to);
					if !cursor_frozen {
						self.repo.set_processed_block(to).await?;
					}
					report.succeeded.push((from, to));
				}
				Err(PollerError::Chain(e)) => {
					// Provider trouble affects every remaining range; end
					// the pass and let the polling loop reconnect.
					warn!(from, to, error = %e, "Provider failure during backfill");
					report.failed.push((from, to));
					self.record_failure(from, to);
					return Ok(report);
				}
				Err(e) => {
					warn!(from, to, error = %e, "Range failed; retrying on a later pass");
					report.failed.push((from, to));

					let attempts = self.record_failure(from, to);
					if attempts >= self.config.max_range_attempts {
						error!(
							from,
							to,
							attempts,
							"Parking block range after repeated failures"
						);
						self.clear_attempts(from, to);
						if !cursor_frozen {
							self.repo.set_processed_block(to).await?;
						}
					} else {
						cursor_frozen = true;
					}
				}
			}

			base = to;
		}

		self.reconciler.backfill_missing_uids().await?;

		Ok(report)
	}

	/// One polling cycle: if the head has moved past the cursor, process a
	/// single batch-sized range and advance.
	pub async fn poll_once(&self) -> Result<(), PollerError> {
		let head = self.client.block_number().await?;
		let base = self.cursor_base().await?;

		if head <= base {
			return Ok(());
		}

		let from = base + 1;
		let to = (base + self.config.batch_size).min(head);

		match self.process_range(from, to).await {
			Ok(()) => {
				self.clear_attempts(from, to);
				self.repo.set_processed_block(to).await?;
			}
			Err(e) => {
				let attempts = self.record_failure(from, to);
				if attempts >= self.config.max_range_attempts {
					error!(
						from,
						to,
						attempts,
						"Parking block range after repeated failures"
					);
					self.clear_attempts(from, to);
					self.repo.set_processed_block(to).await?;
				} else {
					return Err(e);
				}
			}
		}

		self.reconciler.backfill_missing_uids().await?;

		Ok(())
	}

	/// Fetches, decodes, and reconciles all logs in a block range. Decode
	/// failures skip the single event; storage failures fail the range.
	async fn process_range(&self, from: u64, to: u64) -> Result<(), PollerError> {
		let filter = Filter::new()
			.address(self.contract_addresses.clone())
			.event_signature(vec![
				ConditionalOrderCreated::SIGNATURE_HASH,
				Trade::SIGNATURE_HASH,
				OrderInvalidated::SIGNATURE_HASH,
			])
			.from_block(from)
			.to_block(to);

		let mut logs = self.client.get_logs(&filter).await?;
		if logs.is_empty() {
			return Ok(());
		}

		logs.sort_by_key(|log| (log.block_number, log.log_index));
		debug!(from, to, count = logs.len(), "Processing logs");

		for log in &logs {
			match self.decoder.decode(log) {
				Ok(Some(event)) => {
					self.reconciler.apply_event(&event).await?;
				}
				Ok(None) => {
					// Creation event for a foreign handler.
				}
				Err(e) => {
					warn!(
						block = log.block_number,
						log_index = log.log_index,
						error = %e,
						"Skipping undecodable event"
					);
				}
			}
		}

		Ok(())
	}

	/// Cursor position clamped to the configured starting block. The value
	/// is the last processed block; processing resumes one past it.
	async fn cursor_base(&self) -> Result<u64, StorageError> {
		let floor = self.config.start_block.saturating_sub(1);
		Ok(match self.repo.get_latest_processed_block().await? {
			Some(cursor) => cursor.max(floor),
			None => floor,
		})
	}

	fn record_failure(&self, from: u64, to: u64) -> u32 {
		let mut attempts = self.range_attempts.lock().expect("attempts lock poisoned");
		let count = attempts.entry((from, to)).or_insert(0);
		*count += 1;
		*count
	}

	fn clear_attempts(&self, from: u64, to: u64) {
		self.range_attempts
			.lock()
			.expect("attempts lock poisoned")
			.remove(&(from, to));
	}
}
