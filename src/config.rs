//! Command line and environment configuration.

use crate::ledger::ClientConfig;
use crate::store::RecordKind;
use crate::sync::{RetryPolicy, StreamConfig, SyncConfig};
use clap::{Parser, ValueEnum};
use std::time::Duration;

/// A stream the synchronizer can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StreamArg {
	Blocks,
	Transactions,
}

impl From<StreamArg> for RecordKind {
	fn from(stream: StreamArg) -> Self {
		match stream {
			StreamArg::Blocks => RecordKind::Blocks,
			StreamArg::Transactions => RecordKind::Transactions,
		}
	}
}

/// Mirrors blocks and bank send transactions of a remote ledger into a local database.
#[derive(Parser, Debug, Clone)]
#[command(name = "ledger-mirror", version, about)]
pub struct Args {
	/// GraphQL endpoint of the remote ledger.
	#[arg(
		long,
		env = "LEDGER_ENDPOINT",
		default_value = "http://127.0.0.1:8546/graphql/query"
	)]
	pub endpoint: String,

	/// Database connection string.
	#[arg(long, env = "DATABASE_URL", default_value = "sqlite://ledger-mirror.db")]
	pub database_url: String,

	/// Maximum number of pooled database connections.
	#[arg(
		long,
		env = "DATABASE_MAX_CONNECTIONS",
		default_value_t = 4,
		value_parser = clap::value_parser!(u32).range(1..)
	)]
	pub db_max_connections: u32,

	/// Timeout of a single ledger request, in seconds.
	#[arg(long, env = "LEDGER_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
	pub request_timeout_secs: u64,

	/// Streams to mirror.
	#[arg(
		long,
		env = "MIRROR_STREAMS",
		value_enum,
		value_delimiter = ',',
		default_value = "blocks,transactions"
	)]
	pub streams: Vec<StreamArg>,

	/// First block height to mirror.
	#[arg(long, env = "MIRROR_BLOCKS_START", default_value_t = 1)]
	pub blocks_start: u64,

	/// First block height whose transactions are mirrored.
	#[arg(long, env = "MIRROR_TRANSACTIONS_START", default_value_t = 1)]
	pub transactions_start: u64,

	/// Heights fetched per block cycle.
	#[arg(
		long,
		env = "MIRROR_BLOCK_WINDOW",
		default_value_t = 10,
		value_parser = clap::value_parser!(u64).range(1..)
	)]
	pub block_window: u64,

	/// Heights fetched per transaction cycle.
	#[arg(
		long,
		env = "MIRROR_TRANSACTION_WINDOW",
		default_value_t = 100,
		value_parser = clap::value_parser!(u64).range(1..)
	)]
	pub transaction_window: u64,

	/// Pause between frontier checks once caught up, in seconds.
	#[arg(
		long,
		env = "MIRROR_POLL_INTERVAL_SECS",
		default_value_t = 60,
		value_parser = clap::value_parser!(u64).range(1..)
	)]
	pub poll_interval_secs: u64,

	/// First delay after a failed cycle, in seconds. Doubles with each consecutive failure.
	#[arg(
		long,
		env = "MIRROR_BACKOFF_SECS",
		default_value_t = 60,
		value_parser = clap::value_parser!(u64).range(1..)
	)]
	pub backoff_secs: u64,

	/// Upper bound of the failure backoff, in seconds. Unbounded when unset.
	#[arg(long, env = "MIRROR_BACKOFF_MAX_SECS")]
	pub backoff_max_secs: Option<u64>,

	/// Retries of a missing block's time before its transactions are skipped.
	#[arg(long, env = "MIRROR_TIME_LOOKUP_RETRIES", default_value_t = 3)]
	pub time_lookup_retries: u32,

	/// First delay between block time lookups, in seconds.
	#[arg(
		long,
		env = "MIRROR_TIME_LOOKUP_BACKOFF_SECS",
		default_value_t = 60,
		value_parser = clap::value_parser!(u64).range(1..)
	)]
	pub time_lookup_backoff_secs: u64,

	/// Warn when a stream's cursor has not moved for this long, in seconds.
	#[arg(
		long,
		env = "MIRROR_STALL_WARN_SECS",
		default_value_t = 900,
		value_parser = clap::value_parser!(u64).range(1..)
	)]
	pub stall_warn_secs: u64,
}

impl Args {
	pub fn stall_warning(&self) -> Duration {
		Duration::from_secs(self.stall_warn_secs)
	}

	pub fn client_config(&self) -> ClientConfig {
		ClientConfig {
			endpoint: self.endpoint.clone(),
			request_timeout: Duration::from_secs(self.request_timeout_secs),
		}
	}

	/// Build the synchronizer configuration. Repeated streams are collapsed.
	pub fn sync_config(&self) -> SyncConfig {
		let mut streams: Vec<RecordKind> = Vec::new();
		for stream in &self.streams {
			let kind = RecordKind::from(*stream);
			if !streams.contains(&kind) {
				streams.push(kind);
			}
		}

		SyncConfig {
			streams,
			blocks: StreamConfig {
				start_height: self.blocks_start,
				window: self.block_window,
			},
			transactions: StreamConfig {
				start_height: self.transactions_start,
				window: self.transaction_window,
			},
			poll_interval: Duration::from_secs(self.poll_interval_secs),
			retry: RetryPolicy {
				base: Duration::from_secs(self.backoff_secs),
				max_interval: self.backoff_max_secs.map(Duration::from_secs),
			},
			time_lookup_retries: self.time_lookup_retries,
			time_lookup_backoff: RetryPolicy::new(Duration::from_secs(
				self.time_lookup_backoff_secs,
			)),
		}
	}
}
