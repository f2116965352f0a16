//! The two mirrored streams and how each one reconciles a fetched window with the store.

use crate::ledger::{Block, LedgerClient, LedgerError, Transaction, Window};
use crate::store::{RecordKind, Store, StoreError};
use crate::sync::retry::{RetryPolicy, sleep_or_cancel};
use crate::sync::types::SyncError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Counts from reconciling one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciled {
	/// Records newly written.
	pub written: usize,
	/// Records dropped because they were already persisted.
	pub duplicates: usize,
	/// Records that could not be written and were given up on.
	pub skipped: usize,
	/// Shutdown was requested before the window was finished.
	pub interrupted: bool,
}

/// A kind of record mirrored from the ledger
#[async_trait]
pub trait SyncStream: Send + Sync {
	type Record: Send + Sync;

	fn kind(&self) -> RecordKind;

	/// Height a record belongs to.
	fn height(record: &Self::Record) -> u64;

	/// Fetch the window's records from the ledger.
	async fn fetch(
		&self,
		ledger: &dyn LedgerClient,
		window: Window,
	) -> Result<Vec<Self::Record>, LedgerError>;

	/// Write the records not yet persisted.
	///
	/// `existing` holds the window's heights that were persisted when the cycle was planned.
	/// Records outside the window are ignored.
	async fn reconcile(
		&self,
		store: &dyn Store,
		window: Window,
		existing: &BTreeSet<u64>,
		records: Vec<Self::Record>,
		cancel: &CancellationToken,
	) -> Result<Reconciled, SyncError>;
}

/// Blocks, keyed by height.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockStream;

#[async_trait]
impl SyncStream for BlockStream {
	type Record = Block;

	fn kind(&self) -> RecordKind {
		RecordKind::Blocks
	}

	fn height(record: &Block) -> u64 {
		record.height
	}

	async fn fetch(&self, ledger: &dyn LedgerClient, window: Window) -> Result<Vec<Block>, LedgerError> {
		ledger.fetch_blocks(window).await
	}

	async fn reconcile(
		&self,
		store: &dyn Store,
		window: Window,
		existing: &BTreeSet<u64>,
		mut records: Vec<Block>,
		_cancel: &CancellationToken,
	) -> Result<Reconciled, SyncError> {
		let mut outcome = Reconciled::default();
		records.sort_by_key(|block| block.height);
		records.dedup_by_key(|block| block.height);

		for block in records.iter().filter(|block| window.contains(block.height)) {
			if existing.contains(&block.height) {
				outcome.duplicates += 1;
				continue;
			}
			store.upsert_block(block).await?;
			outcome.written += 1;
		}

		Ok(outcome)
	}
}

/// Result of resolving a transaction's block time.
enum TimeLookup {
	Found(DateTime<Utc>),
	Missing,
	Cancelled,
}

/// Bank send transactions, keyed by `(block_height, index)` and stamped with their block's time.
#[derive(Debug, Clone, Copy)]
pub struct TransactionStream {
	/// Retries of a missing block before its transactions are skipped.
	time_lookup_retries: u32,
	time_lookup_backoff: RetryPolicy,
}

impl TransactionStream {
	pub fn new(time_lookup_retries: u32, time_lookup_backoff: RetryPolicy) -> Self {
		Self {
			time_lookup_retries,
			time_lookup_backoff,
		}
	}

	/// Look up the time of the block at `height`, waiting for the block stream to write it.
	async fn resolve_time(
		&self,
		store: &dyn Store,
		height: u64,
		cancel: &CancellationToken,
	) -> Result<TimeLookup, StoreError> {
		let mut schedule = self.time_lookup_backoff.schedule();
		let mut retries = 0;

		loop {
			match store.block_time(height).await {
				Ok(time) => return Ok(TimeLookup::Found(time)),
				Err(StoreError::NotFound(_)) if retries < self.time_lookup_retries => {
					retries += 1;
					let delay = schedule.next_delay();
					debug!(
						"Block {} not stored yet, retrying time lookup in {:?} ({}/{})",
						height, delay, retries, self.time_lookup_retries
					);
					if !sleep_or_cancel(delay, cancel).await {
						return Ok(TimeLookup::Cancelled);
					}
				}
				Err(StoreError::NotFound(_)) => return Ok(TimeLookup::Missing),
				Err(e) => return Err(e),
			}
		}
	}
}

#[async_trait]
impl SyncStream for TransactionStream {
	type Record = Transaction;

	fn kind(&self) -> RecordKind {
		RecordKind::Transactions
	}

	fn height(record: &Transaction) -> u64 {
		record.block_height
	}

	async fn fetch(
		&self,
		ledger: &dyn LedgerClient,
		window: Window,
	) -> Result<Vec<Transaction>, LedgerError> {
		ledger.fetch_transactions(window).await
	}

	async fn reconcile(
		&self,
		store: &dyn Store,
		window: Window,
		_existing: &BTreeSet<u64>,
		mut records: Vec<Transaction>,
		cancel: &CancellationToken,
	) -> Result<Reconciled, SyncError> {
		let mut outcome = Reconciled::default();
		// Heights alone do not identify transactions.
		let existing = store.existing_transactions(window).await?;
		let mut times: HashMap<u64, Option<DateTime<Utc>>> = HashMap::new();

		records.sort_by_key(Transaction::key);
		records.dedup_by_key(|tx| tx.key());

		for tx in records.iter().filter(|tx| window.contains(tx.block_height)) {
			if existing.contains(&tx.key()) {
				outcome.duplicates += 1;
				continue;
			}

			let time = match times.get(&tx.block_height) {
				Some(time) => *time,
				None => {
					let time = match self.resolve_time(store, tx.block_height, cancel).await? {
						TimeLookup::Found(time) => Some(time),
						TimeLookup::Missing => None,
						TimeLookup::Cancelled => {
							outcome.interrupted = true;
							return Ok(outcome);
						}
					};
					times.insert(tx.block_height, time);
					time
				}
			};

			match time {
				Some(time) => {
					store.upsert_transaction(tx, time).await?;
					outcome.written += 1;
				}
				None => {
					warn!(
						"Skipping transaction {} of block {}: block time unavailable after {} retries",
						tx.index, tx.block_height, self.time_lookup_retries
					);
					outcome.skipped += 1;
				}
			}
		}

		Ok(outcome)
	}
}
