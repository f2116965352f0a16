use crate::ledger::LedgerError;
use crate::store::{RecordKind, StoreError};
use crate::sync::retry::RetryPolicy;
use std::time::Duration;

/// Per-stream settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
	/// Height the stream starts from when the store holds nothing beyond it.
	pub start_height: u64,
	/// Number of heights fetched per cycle.
	pub window: u64,
}

/// Configuration for the synchronizer and its loops
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// Streams to run.
	pub streams: Vec<RecordKind>,
	pub blocks: StreamConfig,
	pub transactions: StreamConfig,
	/// Pause between frontier checks once a stream has caught up.
	pub poll_interval: Duration,
	/// Loop-level backoff after a failed cycle.
	pub retry: RetryPolicy,
	/// Retries of a missing parent block's time before the transaction is skipped.
	pub time_lookup_retries: u32,
	pub time_lookup_backoff: RetryPolicy,
}

impl SyncConfig {
	pub fn stream(&self, kind: RecordKind) -> StreamConfig {
		match kind {
			RecordKind::Blocks => self.blocks,
			RecordKind::Transactions => self.transactions,
		}
	}
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			streams: vec![RecordKind::Blocks, RecordKind::Transactions],
			blocks: StreamConfig {
				start_height: 1,
				window: 10,
			},
			transactions: StreamConfig {
				start_height: 1,
				window: 100,
			},
			poll_interval: Duration::from_secs(60),
			retry: RetryPolicy::default(),
			time_lookup_retries: 3,
			time_lookup_backoff: RetryPolicy::default(),
		}
	}
}

/// Failure of a single reconciliation cycle. Never escapes a loop.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Ledger error: {0}")]
	Ledger(#[from] LedgerError),

	#[error("Store error: {0}")]
	Store(#[from] StoreError),
}

impl SyncError {
	/// Failures that may indicate schema drift on the ledger side.
	pub fn needs_attention(&self) -> bool {
		matches!(self, SyncError::Ledger(e) if e.is_decode())
	}
}
