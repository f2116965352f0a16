//! SQLite store backed by `sqlx`.
//!
//! Three tables mirror the ledger: `blocks` keyed by height, `transactions` keyed by
//! `(block_height, tx_index)`, and `transfers` holding one row per transfer of a transaction.
//! Every insert uses `ON CONFLICT DO NOTHING`, which is what makes concurrent writers safe.

use super::{RecordKind, Store, StoreError};
use crate::ledger::{Block, Transaction, Window};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;
use tracing::{debug, info};

const SCHEMA: [&str; 4] = [
	r#"
	CREATE TABLE IF NOT EXISTS blocks (
		height INTEGER PRIMARY KEY,
		time TEXT NOT NULL,
		version TEXT NOT NULL,
		chain_id TEXT NOT NULL,
		proposer_address_raw TEXT NOT NULL
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS transactions (
		block_height INTEGER NOT NULL,
		tx_index INTEGER NOT NULL,
		time TEXT NOT NULL,
		transfer_count INTEGER NOT NULL,
		PRIMARY KEY (block_height, tx_index)
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS transfers (
		block_height INTEGER NOT NULL,
		tx_index INTEGER NOT NULL,
		position INTEGER NOT NULL,
		amount TEXT NOT NULL,
		from_address TEXT NOT NULL,
		to_address TEXT NOT NULL,
		time TEXT NOT NULL,
		PRIMARY KEY (block_height, tx_index, position)
	)
	"#,
	"CREATE INDEX IF NOT EXISTS transfers_by_sender ON transfers (from_address, block_height)",
];

/// Store implementation over a SQLite connection pool
#[derive(Clone)]
pub struct SqliteStore {
	pool: SqlitePool,
}

impl SqliteStore {
	/// Open (creating if missing) the database at `url` and ensure the schema exists.
	///
	/// # Arguments
	/// * `url` - A SQLite URL such as `sqlite://mirror.db` or `sqlite::memory:`.
	/// * `max_connections` - Upper bound of the connection pool.
	pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
		let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

		// Every connection to an in-memory URL opens its own empty database, and the database lives
		// only as long as its connection.
		let max_connections = if is_in_memory(url) {
			1
		} else {
			max_connections.max(1)
		};
		let pool = SqlitePoolOptions::new()
			.max_connections(max_connections)
			.idle_timeout(None)
			.max_lifetime(None)
			.connect_with(options)
			.await?;

		for statement in SCHEMA {
			sqlx::query(statement).execute(&pool).await?;
		}

		info!("Connected to store at {}", url);
		Ok(Self { pool })
	}
}

fn is_in_memory(url: &str) -> bool {
	url.contains(":memory:") || url.contains("mode=memory")
}

fn to_sql_height(height: u64) -> Result<i64, StoreError> {
	i64::try_from(height).map_err(|_| StoreError::HeightOverflow(height))
}

/// Window bounds clamped to the SQLite integer range.
fn sql_bounds(window: Window) -> (i64, i64) {
	(
		i64::try_from(window.from).unwrap_or(i64::MAX),
		i64::try_from(window.to).unwrap_or(i64::MAX),
	)
}

#[async_trait]
impl Store for SqliteStore {
	async fn existing_heights(
		&self,
		kind: RecordKind,
		window: Window,
	) -> Result<BTreeSet<u64>, StoreError> {
		let query = match kind {
			RecordKind::Blocks => "SELECT height FROM blocks WHERE height BETWEEN ?1 AND ?2",
			RecordKind::Transactions => {
				"SELECT DISTINCT block_height FROM transactions WHERE block_height BETWEEN ?1 AND ?2"
			}
		};
		let (from, to) = sql_bounds(window);

		let heights = sqlx::query_scalar::<_, i64>(query)
			.bind(from)
			.bind(to)
			.fetch_all(&self.pool)
			.await?;

		debug!("Found {} existing {} in {}", heights.len(), kind, window);
		Ok(heights.into_iter().map(|h| h as u64).collect())
	}

	async fn existing_transactions(
		&self,
		window: Window,
	) -> Result<HashSet<(u64, u32)>, StoreError> {
		let (from, to) = sql_bounds(window);

		let keys = sqlx::query_as::<_, (i64, i64)>(
			"SELECT block_height, tx_index FROM transactions WHERE block_height BETWEEN ?1 AND ?2",
		)
		.bind(from)
		.bind(to)
		.fetch_all(&self.pool)
		.await?;

		Ok(keys
			.into_iter()
			.map(|(height, index)| (height as u64, index as u32))
			.collect())
	}

	async fn upsert_block(&self, block: &Block) -> Result<(), StoreError> {
		let result = sqlx::query(
			"INSERT INTO blocks (height, time, version, chain_id, proposer_address_raw)
			VALUES (?1, ?2, ?3, ?4, ?5)
			ON CONFLICT (height) DO NOTHING",
		)
		.bind(to_sql_height(block.height)?)
		.bind(block.time)
		.bind(&block.version)
		.bind(&block.chain_id)
		.bind(&block.proposer_address_raw)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			debug!("Block {} already stored", block.height);
		}
		Ok(())
	}

	async fn upsert_transaction(
		&self,
		transaction: &Transaction,
		time: DateTime<Utc>,
	) -> Result<(), StoreError> {
		let height = to_sql_height(transaction.block_height)?;
		let index = i64::from(transaction.index);

		let mut tx = self.pool.begin().await?;

		let result = sqlx::query(
			"INSERT INTO transactions (block_height, tx_index, time, transfer_count)
			VALUES (?1, ?2, ?3, ?4)
			ON CONFLICT (block_height, tx_index) DO NOTHING",
		)
		.bind(height)
		.bind(index)
		.bind(time)
		.bind(transaction.transfers.len() as i64)
		.execute(&mut *tx)
		.await?;

		if result.rows_affected() == 0 {
			debug!(
				"Transaction {}/{} already stored",
				transaction.block_height, transaction.index
			);
			tx.rollback().await?;
			return Ok(());
		}

		for (position, transfer) in transaction.transfers.iter().enumerate() {
			sqlx::query(
				"INSERT INTO transfers (block_height, tx_index, position, amount, from_address, to_address, time)
				VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
				ON CONFLICT (block_height, tx_index, position) DO NOTHING",
			)
			.bind(height)
			.bind(index)
			.bind(position as i64)
			.bind(&transfer.amount)
			.bind(&transfer.from_address)
			.bind(&transfer.to_address)
			.bind(time)
			.execute(&mut *tx)
			.await?;
		}

		tx.commit().await?;
		Ok(())
	}

	async fn block_time(&self, height: u64) -> Result<DateTime<Utc>, StoreError> {
		sqlx::query_scalar::<_, DateTime<Utc>>("SELECT time FROM blocks WHERE height = ?1")
			.bind(to_sql_height(height)?)
			.fetch_optional(&self.pool)
			.await?
			.ok_or(StoreError::NotFound(height))
	}

	async fn max_persisted_height(&self, kind: RecordKind) -> Result<Option<u64>, StoreError> {
		let query = match kind {
			RecordKind::Blocks => "SELECT MAX(height) FROM blocks",
			RecordKind::Transactions => "SELECT MAX(block_height) FROM transactions",
		};

		let height = sqlx::query_scalar::<_, Option<i64>>(query)
			.fetch_one(&self.pool)
			.await?;
		Ok(height.map(|h| h as u64))
	}

	async fn ping(&self) -> Result<(), StoreError> {
		sqlx::query("SELECT 1").execute(&self.pool).await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::Transfer;
	use chrono::TimeZone;

	async fn memory_store() -> SqliteStore {
		SqliteStore::connect("sqlite::memory:", 1).await.unwrap()
	}

	fn block(height: u64) -> Block {
		Block {
			height,
			time: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
				+ chrono::Duration::seconds(height as i64),
			version: "v1".to_string(),
			chain_id: "test".to_string(),
			proposer_address_raw: "g1proposer".to_string(),
		}
	}

	fn transaction(block_height: u64, index: u32, transfers: usize) -> Transaction {
		Transaction {
			block_height,
			index,
			transfers: (0..transfers)
				.map(|i| Transfer {
					amount: format!("{}ugnot", i + 1),
					from_address: "g1from".to_string(),
					to_address: format!("g1to{}", i),
				})
				.collect(),
		}
	}

	async fn count(store: &SqliteStore, table: &str) -> i64 {
		sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
			.fetch_one(&store.pool)
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn test_block_upsert_is_idempotent() {
		let store = memory_store().await;
		store.upsert_block(&block(10)).await.unwrap();
		store.upsert_block(&block(10)).await.unwrap();

		let mut changed = block(10);
		changed.version = "v2".to_string();
		store.upsert_block(&changed).await.unwrap();

		assert_eq!(count(&store, "blocks").await, 1);
		let version: String = sqlx::query_scalar("SELECT version FROM blocks WHERE height = 10")
			.fetch_one(&store.pool)
			.await
			.unwrap();
		assert_eq!(version, "v1");
	}

	#[tokio::test]
	async fn test_transaction_upsert_is_idempotent() {
		let store = memory_store().await;
		let time = block(50).time;
		store.upsert_transaction(&transaction(50, 0, 2), time).await.unwrap();
		store.upsert_transaction(&transaction(50, 0, 2), time).await.unwrap();
		store.upsert_transaction(&transaction(50, 1, 0), time).await.unwrap();

		assert_eq!(count(&store, "transactions").await, 2);
		assert_eq!(count(&store, "transfers").await, 2);

		let keys = store
			.existing_transactions(Window::starting_at(50, 1))
			.await
			.unwrap();
		assert_eq!(keys, HashSet::from([(50, 0), (50, 1)]));
	}

	#[tokio::test]
	async fn test_existing_heights_respects_window() {
		let store = memory_store().await;
		for height in [99, 100, 103, 109, 110] {
			store.upsert_block(&block(height)).await.unwrap();
		}
		store
			.upsert_transaction(&transaction(105, 0, 1), block(105).time)
			.await
			.unwrap();
		store
			.upsert_transaction(&transaction(105, 1, 1), block(105).time)
			.await
			.unwrap();

		let window = Window::starting_at(100, 10);
		let blocks = store.existing_heights(RecordKind::Blocks, window).await.unwrap();
		assert_eq!(blocks, BTreeSet::from([100, 103, 109]));

		let transactions = store
			.existing_heights(RecordKind::Transactions, window)
			.await
			.unwrap();
		assert_eq!(transactions, BTreeSet::from([105]));
	}

	#[tokio::test]
	async fn test_block_time_lookup() {
		let store = memory_store().await;
		store.upsert_block(&block(7)).await.unwrap();

		assert_eq!(store.block_time(7).await.unwrap(), block(7).time);
		assert!(matches!(
			store.block_time(8).await,
			Err(StoreError::NotFound(8))
		));
	}

	#[tokio::test]
	async fn test_in_memory_pool_shares_one_database() {
		let store = SqliteStore::connect("sqlite::memory:", 4).await.unwrap();
		store.upsert_block(&block(7)).await.unwrap();

		let lookups = futures::future::join_all((0..8).map(|_| store.block_time(7))).await;
		assert!(lookups.into_iter().all(|time| time.unwrap() == block(7).time));
		assert!(is_in_memory("sqlite::memory:"));
		assert!(!is_in_memory("sqlite://ledger-mirror.db"));
	}

	#[tokio::test]
	async fn test_max_persisted_height() {
		let store = memory_store().await;
		assert_eq!(store.max_persisted_height(RecordKind::Blocks).await.unwrap(), None);

		store.upsert_block(&block(3)).await.unwrap();
		store.upsert_block(&block(12)).await.unwrap();
		store
			.upsert_transaction(&transaction(8, 0, 0), block(8).time)
			.await
			.unwrap();

		assert_eq!(
			store.max_persisted_height(RecordKind::Blocks).await.unwrap(),
			Some(12)
		);
		assert_eq!(
			store
				.max_persisted_height(RecordKind::Transactions)
				.await
				.unwrap(),
			Some(8)
		);
	}

	#[tokio::test]
	async fn test_height_overflow_is_rejected() {
		let store = memory_store().await;
		assert!(matches!(
			store.upsert_block(&block(u64::MAX)).await,
			Err(StoreError::HeightOverflow(u64::MAX))
		));
	}

	#[tokio::test]
	async fn test_records_survive_reconnect() {
		let dir = tempfile::tempdir().unwrap();
		let url = format!("sqlite://{}", dir.path().join("mirror.db").display());

		let store = SqliteStore::connect(&url, 2).await.unwrap();
		store.ping().await.unwrap();
		store.upsert_block(&block(41)).await.unwrap();
		store.pool.close().await;

		let reopened = SqliteStore::connect(&url, 2).await.unwrap();
		assert_eq!(
			reopened.max_persisted_height(RecordKind::Blocks).await.unwrap(),
			Some(41)
		);
	}
}
