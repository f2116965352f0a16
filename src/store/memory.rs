//! In-memory store used by the synchronization tests.

use super::{RecordKind, Store, StoreError};
use crate::ledger::{Block, Transaction, Window};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct MemoryStore {
	blocks: Mutex<BTreeMap<u64, Block>>,
	transactions: Mutex<BTreeMap<(u64, u32), (Transaction, DateTime<Utc>)>>,
	/// Number of upcoming writes that fail.
	failing_writes: AtomicUsize,
	/// Number of upsert calls, including no-ops.
	writes: AtomicUsize,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn fail_next_writes(&self, count: usize) {
		self.failing_writes.store(count, Ordering::SeqCst);
	}

	pub fn write_calls(&self) -> usize {
		self.writes.load(Ordering::SeqCst)
	}

	pub fn block_heights(&self) -> Vec<u64> {
		self.blocks.lock().unwrap().keys().copied().collect()
	}

	pub fn transactions(&self) -> Vec<(Transaction, DateTime<Utc>)> {
		self.transactions.lock().unwrap().values().cloned().collect()
	}

	fn begin_write(&self) -> Result<(), StoreError> {
		self.writes.fetch_add(1, Ordering::SeqCst);
		let failing = self
			.failing_writes
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
		match failing {
			Ok(_) => Err(StoreError::Database(sqlx::Error::PoolTimedOut)),
			Err(_) => Ok(()),
		}
	}
}

#[async_trait]
impl Store for MemoryStore {
	async fn existing_heights(
		&self,
		kind: RecordKind,
		window: Window,
	) -> Result<BTreeSet<u64>, StoreError> {
		Ok(match kind {
			RecordKind::Blocks => self
				.blocks
				.lock()
				.unwrap()
				.range(window.from..=window.to)
				.map(|(height, _)| *height)
				.collect(),
			RecordKind::Transactions => self
				.transactions
				.lock()
				.unwrap()
				.keys()
				.filter(|(height, _)| window.contains(*height))
				.map(|(height, _)| *height)
				.collect(),
		})
	}

	async fn existing_transactions(
		&self,
		window: Window,
	) -> Result<HashSet<(u64, u32)>, StoreError> {
		Ok(self
			.transactions
			.lock()
			.unwrap()
			.keys()
			.filter(|(height, _)| window.contains(*height))
			.copied()
			.collect())
	}

	async fn upsert_block(&self, block: &Block) -> Result<(), StoreError> {
		self.begin_write()?;
		self.blocks
			.lock()
			.unwrap()
			.entry(block.height)
			.or_insert_with(|| block.clone());
		Ok(())
	}

	async fn upsert_transaction(
		&self,
		transaction: &Transaction,
		time: DateTime<Utc>,
	) -> Result<(), StoreError> {
		self.begin_write()?;
		self.transactions
			.lock()
			.unwrap()
			.entry(transaction.key())
			.or_insert_with(|| (transaction.clone(), time));
		Ok(())
	}

	async fn block_time(&self, height: u64) -> Result<DateTime<Utc>, StoreError> {
		self.blocks
			.lock()
			.unwrap()
			.get(&height)
			.map(|block| block.time)
			.ok_or(StoreError::NotFound(height))
	}

	async fn max_persisted_height(&self, kind: RecordKind) -> Result<Option<u64>, StoreError> {
		Ok(match kind {
			RecordKind::Blocks => self.blocks.lock().unwrap().keys().next_back().copied(),
			RecordKind::Transactions => self
				.transactions
				.lock()
				.unwrap()
				.keys()
				.next_back()
				.map(|(height, _)| *height),
		})
	}

	async fn ping(&self) -> Result<(), StoreError> {
		Ok(())
	}
}
