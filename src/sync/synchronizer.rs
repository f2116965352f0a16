//! Synchronizer: owns the reconciliation loops and their shutdown.

use crate::ledger::LedgerClient;
use crate::store::{RecordKind, Store};
use crate::sync::progress::ProgressStats;
use crate::sync::reconcile::ReconciliationLoop;
use crate::sync::retry::sleep_or_cancel;
use crate::sync::streams::{BlockStream, SyncStream, TransactionStream};
use crate::sync::types::SyncConfig;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs one independent task per configured stream.
///
/// The loops share nothing but the store. Cancelling stops each loop before its next cycle or
/// during a sleep; in-flight requests and writes are allowed to finish.
pub struct Synchronizer {
	cancel: CancellationToken,
	tasks: Vec<(RecordKind, JoinHandle<ProgressStats>)>,
	cursors: HashMap<RecordKind, watch::Receiver<u64>>,
}

impl Synchronizer {
	/// Spawn the loops for every stream in `config.streams`.
	///
	/// Must be called from within a Tokio runtime.
	pub fn start(
		config: &SyncConfig,
		ledger: Arc<dyn LedgerClient>,
		store: Arc<dyn Store>,
	) -> Self {
		let mut synchronizer = Self {
			cancel: CancellationToken::new(),
			tasks: Vec::new(),
			cursors: HashMap::new(),
		};

		for kind in &config.streams {
			match kind {
				RecordKind::Blocks => synchronizer.spawn(BlockStream, config, &ledger, &store),
				RecordKind::Transactions => synchronizer.spawn(
					TransactionStream::new(
						config.time_lookup_retries,
						config.time_lookup_backoff,
					),
					config,
					&ledger,
					&store,
				),
			}
		}

		info!("Synchronizer started {} streams", synchronizer.tasks.len());
		synchronizer
	}

	fn spawn<S>(
		&mut self,
		stream: S,
		config: &SyncConfig,
		ledger: &Arc<dyn LedgerClient>,
		store: &Arc<dyn Store>,
	) where
		S: SyncStream + 'static,
	{
		let kind = stream.kind();
		if self.cursors.contains_key(&kind) {
			return;
		}

		let sync = ReconciliationLoop::new(
			stream,
			config.stream(kind),
			ledger.clone(),
			store.clone(),
			config.poll_interval,
			config.retry.schedule(),
			self.cancel.child_token(),
		);
		self.cursors.insert(kind, sync.subscribe());
		self.tasks.push((kind, tokio::spawn(sync.run())));
	}

	/// Watch a stream's cursor, if that stream is running.
	pub fn cursor(&self, kind: RecordKind) -> Option<watch::Receiver<u64>> {
		self.cursors.get(&kind).cloned()
	}

	/// Warn about every stream whose cursor did not move during the last `stall_after`.
	///
	/// Runs until the synchronizer is cancelled.
	pub async fn watch_stalls(&self, stall_after: Duration) {
		let mut cursors: Vec<(RecordKind, watch::Receiver<u64>)> = self
			.tasks
			.iter()
			.filter_map(|(kind, _)| self.cursor(*kind).map(|cursor| (*kind, cursor)))
			.collect();

		while sleep_or_cancel(stall_after, &self.cancel).await {
			for (kind, height) in stalled_cursors(&mut cursors) {
				warn!(
					"{} cursor has not moved from {} in {:?}",
					kind, height, stall_after
				);
			}
		}
	}

	/// Stop all loops and wait for them to finish.
	pub async fn shutdown(self) -> Vec<ProgressStats> {
		info!("Shutting down synchronizer");
		self.cancel.cancel();

		let (kinds, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
		let mut stats = Vec::new();
		for (kind, result) in kinds.into_iter().zip(join_all(handles).await) {
			match result {
				Ok(progress) => stats.push(progress),
				Err(e) => error!("{} loop ended abnormally: {}", kind, e),
			}
		}
		stats
	}
}

/// Streams whose cursor has not changed since the previous call, with their current height.
///
/// Streams whose loop has ended are left out.
fn stalled_cursors(cursors: &mut [(RecordKind, watch::Receiver<u64>)]) -> Vec<(RecordKind, u64)> {
	let mut stalled = Vec::new();
	for (kind, cursor) in cursors.iter_mut() {
		match cursor.has_changed() {
			Ok(true) => {
				cursor.borrow_and_update();
			}
			Ok(false) => stalled.push((*kind, *cursor.borrow())),
			Err(_) => {}
		}
	}
	stalled
}
