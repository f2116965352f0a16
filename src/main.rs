mod config;
mod ledger;
mod store;
mod sync;

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::Args;
use crate::ledger::GraphqlLedgerClient;
use crate::store::{SqliteStore, Store};
use crate::sync::Synchronizer;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let args = Args::parse();
	info!("Starting ledger mirror against {}", args.endpoint);

	let store = match SqliteStore::connect(&args.database_url, args.db_max_connections).await {
		Ok(store) => store,
		Err(e) => {
			error!("Failed to open store at {}: {}", args.database_url, e);
			return ExitCode::FAILURE;
		}
	};

	if let Err(e) = store.ping().await {
		error!("Store health check failed: {}", e);
		return ExitCode::FAILURE;
	}

	info!("Connected to store");

	let ledger = match GraphqlLedgerClient::new(&args.client_config()) {
		Ok(client) => client,
		Err(e) => {
			error!("Failed to create ledger client: {}", e);
			return ExitCode::FAILURE;
		}
	};

	let synchronizer = Synchronizer::start(&args.sync_config(), Arc::new(ledger), Arc::new(store));

	tokio::select! {
		result = tokio::signal::ctrl_c() => {
			if let Err(e) = result {
				error!("Failed to listen for shutdown signal: {}", e);
			}
		}
		_ = synchronizer.watch_stalls(args.stall_warning()) => {}
	}

	let stopped = synchronizer.shutdown().await;
	info!("Ledger mirror stopped {} streams", stopped.len());
	ExitCode::SUCCESS
}
