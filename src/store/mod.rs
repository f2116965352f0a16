//! Durable store for mirrored ledger records.
//!
//! The synchronization engine only ever inserts records if absent. Any backend that can answer
//! range existence queries and perform idempotent inserts for the two record kinds can stand
//! behind the `Store` trait; `SqliteStore` is the one shipped with the binary.

#[cfg(test)]
pub mod memory;
/// `sqlx`-backed SQLite implementation
pub mod sqlite;

use crate::ledger::{Block, Transaction, Window};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

pub use sqlite::SqliteStore;

/// The two kinds of records mirrored from the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
	Blocks,
	Transactions,
}

impl fmt::Display for RecordKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RecordKind::Blocks => f.write_str("blocks"),
			RecordKind::Transactions => f.write_str("transactions"),
		}
	}
}

/// Store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("Database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("Block {0} not found")]
	NotFound(u64),

	#[error("Height {0} does not fit the store's integer type")]
	HeightOverflow(u64),
}

/// Storage for blocks and transactions
///
/// Implementations must tolerate concurrent calls from several loops. Inserts are idempotent:
/// writing a record whose identity already exists leaves the store unchanged.
#[async_trait]
pub trait Store: Send + Sync {
	/// Heights within the window that already hold at least one record of `kind`.
	async fn existing_heights(
		&self,
		kind: RecordKind,
		window: Window,
	) -> Result<BTreeSet<u64>, StoreError>;

	/// `(block_height, index)` identities of persisted transactions within the window.
	async fn existing_transactions(
		&self,
		window: Window,
	) -> Result<HashSet<(u64, u32)>, StoreError>;

	/// Insert the block unless a block with the same height exists.
	async fn upsert_block(&self, block: &Block) -> Result<(), StoreError>;

	/// Insert the transaction and its transfers, stamped with its block's time, unless a
	/// transaction with the same identity exists.
	async fn upsert_transaction(
		&self,
		transaction: &Transaction,
		time: DateTime<Utc>,
	) -> Result<(), StoreError>;

	/// The time of the persisted block at `height`.
	///
	/// # Errors
	/// Returns `StoreError::NotFound` if that block has not been written yet.
	async fn block_time(&self, height: u64) -> Result<DateTime<Utc>, StoreError>;

	/// The highest persisted height for `kind`, if any record exists.
	async fn max_persisted_height(&self, kind: RecordKind) -> Result<Option<u64>, StoreError>;

	/// Check that the store is reachable.
	async fn ping(&self) -> Result<(), StoreError>;
}
