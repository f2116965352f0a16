//! Reconciliation loop for a single stream.
//!
//! Each cycle resumes the cursor if needed, plans a window, fetches it, writes what the store
//! lacks, and advances the cursor. A frontier wait sleeps for the poll interval; any failure
//! sleeps for a doubling backoff and re-runs the cycle from planning with the cursor unchanged.
//! Nothing returned from a cycle stops the loop; only cancellation does.

use crate::ledger::{LedgerClient, Window};
use crate::store::Store;
use crate::sync::planner::{Plan, WindowPlanner};
use crate::sync::progress::{ProgressStats, StreamProgress};
use crate::sync::retry::{RetrySchedule, sleep_or_cancel};
use crate::sync::streams::{Reconciled, SyncStream};
use crate::sync::types::{StreamConfig, SyncError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cycle {
	/// The window was handled and the cursor moved to `next`.
	Advanced {
		window: Window,
		next: u64,
		outcome: Reconciled,
	},
	/// The window lies beyond the ledger tip; the cursor did not move.
	Waiting { window: Window, tip: u64 },
	/// Shutdown was requested part-way through the window; the cursor did not move.
	Interrupted,
}

/// Drives one stream from its cursor towards the ledger tip, indefinitely
pub struct ReconciliationLoop<S: SyncStream> {
	stream: S,
	planner: WindowPlanner,
	ledger: Arc<dyn LedgerClient>,
	store: Arc<dyn Store>,
	start_height: u64,
	/// Resolved on the first cycle from the store's contents.
	cursor: Option<u64>,
	cursor_tx: watch::Sender<u64>,
	poll_interval: Duration,
	retry: RetrySchedule,
	cancel: CancellationToken,
	progress: StreamProgress,
}

impl<S: SyncStream> ReconciliationLoop<S> {
	pub fn new(
		stream: S,
		config: StreamConfig,
		ledger: Arc<dyn LedgerClient>,
		store: Arc<dyn Store>,
		poll_interval: Duration,
		retry: RetrySchedule,
		cancel: CancellationToken,
	) -> Self {
		let kind = stream.kind();
		let (cursor_tx, _) = watch::channel(config.start_height);

		Self {
			stream,
			planner: WindowPlanner::new(kind, config.window),
			ledger,
			store,
			start_height: config.start_height,
			cursor: None,
			cursor_tx,
			poll_interval,
			retry,
			cancel,
			progress: StreamProgress::new(kind),
		}
	}

	/// Watch the cursor as it advances.
	pub fn subscribe(&self) -> watch::Receiver<u64> {
		self.cursor_tx.subscribe()
	}

	#[cfg(test)]
	fn cursor(&self) -> Option<u64> {
		self.cursor
	}

	/// Resume from the last persisted height, or the configured start if that is later.
	///
	/// The last persisted height is examined again, since a crash may have left it partially
	/// written.
	async fn resume(&mut self) -> Result<u64, SyncError> {
		if let Some(cursor) = self.cursor {
			return Ok(cursor);
		}

		let kind = self.stream.kind();
		let persisted = self.store.max_persisted_height(kind).await?;
		let cursor = persisted.map_or(self.start_height, |h| h.max(self.start_height));
		info!(
			"Resuming {} at height {} (configured start {}, last persisted {:?})",
			kind, cursor, self.start_height, persisted
		);

		self.progress.record_resume(cursor);
		self.set_cursor(cursor);
		Ok(cursor)
	}

	fn set_cursor(&mut self, cursor: u64) {
		self.cursor = Some(cursor);
		self.cursor_tx.send_replace(cursor);
	}

	/// Run a single cycle: plan, then fetch, reconcile and advance unless waiting.
	pub async fn step(&mut self) -> Result<Cycle, SyncError> {
		let cursor = self.resume().await?;

		let plan = self
			.planner
			.plan(cursor, self.store.as_ref(), self.ledger.as_ref())
			.await?;

		let (window, existing) = match plan {
			Plan::Wait { window, tip } => return Ok(Cycle::Waiting { window, tip }),
			Plan::Covered { window } => {
				let next = WindowPlanner::next_cursor(window, None);
				self.set_cursor(next);
				return Ok(Cycle::Advanced {
					window,
					next,
					outcome: Reconciled::default(),
				});
			}
			Plan::Fetch { window, existing } => (window, existing),
		};

		let records = self.stream.fetch(self.ledger.as_ref(), window).await?;
		let highest = records
			.iter()
			.map(S::height)
			.filter(|height| window.contains(*height))
			.max();
		debug!(
			"Fetched {} {} in {}, {} already stored",
			records.len(),
			self.stream.kind(),
			window,
			existing.len()
		);

		let outcome = self
			.stream
			.reconcile(self.store.as_ref(), window, &existing, records, &self.cancel)
			.await?;
		if outcome.interrupted {
			return Ok(Cycle::Interrupted);
		}

		let next = WindowPlanner::next_cursor(window, highest);
		self.set_cursor(next);
		Ok(Cycle::Advanced {
			window,
			next,
			outcome,
		})
	}

	/// Run cycles until cancelled, returning the stream's final progress.
	pub async fn run(mut self) -> ProgressStats {
		let kind = self.stream.kind();
		info!(
			"Starting {} loop with window of {} heights",
			kind,
			self.planner.window_size()
		);

		while !self.cancel.is_cancelled() {
			let delay = match self.step().await {
				Ok(Cycle::Advanced {
					window,
					next,
					outcome,
				}) => {
					self.retry.reset();
					self.progress.record_cycle(&outcome, next);
					self.progress.log_progress(false);
					if outcome.written > 0 || outcome.skipped > 0 {
						info!(
							"Wrote {} {} in {} ({} already stored, {} skipped), next height {}",
							outcome.written,
							kind,
							window,
							outcome.duplicates,
							outcome.skipped,
							next
						);
					}
					continue;
				}
				Ok(Cycle::Waiting { window, tip }) => {
					self.retry.reset();
					self.progress.record_wait();
					info!(
						"{} window {} is past the latest height {}, waiting for new blocks",
						kind, window, tip
					);
					self.poll_interval
				}
				Ok(Cycle::Interrupted) => break,
				Err(e) => {
					self.progress.record_failure();
					let delay = self.retry.next_delay();
					if e.needs_attention() {
						error!("{} cycle failed, retrying in {:?}: {}", kind, delay, e);
					} else {
						warn!("{} cycle failed, retrying in {:?}: {}", kind, delay, e);
					}
					delay
				}
			};

			if !sleep_or_cancel(delay, &self.cancel).await {
				break;
			}
		}

		self.progress.log_progress(true);
		let stats = self.progress.stats();
		info!("{}", stats.summary());
		stats
	}
}
