//! Blockchain-facing reconciliation engine.
//!
//! Three pieces, composed by the service:
//!
//! - [`decoder`] - pure ABI log decoding into the domain event union
//! - [`reconciler`] - applies decoded events to the order repository under
//!   the lifecycle state machine
//! - [`poller`] - drives block-range queries (backfill, then interval
//!   polling) and owns the processed-block cursor

pub mod decoder;
pub mod poller;
pub mod reconciler;

pub use decoder::{DecodeError, EventDecoder};
pub use poller::{BackfillReport, ChainPoller, PollerConfig, PollerError};
pub use reconciler::{ReconcileError, Reconciler};
