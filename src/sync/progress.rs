//! Progress tracking for a reconciliation loop.
//!
//! This module provides the `StreamProgress` tracker, which records how far a stream's cursor
//! has moved and what each cycle did: records written, duplicates dropped, records skipped,
//! frontier waits, and failed cycles. The loop logs it periodically and at shutdown.

use crate::store::RecordKind;
use crate::sync::streams::Reconciled;
use tracing::info;

/// Heights between two periodic progress lines.
const LOG_EVERY: u64 = 1000;

/// Tracks synchronization progress of one stream
#[derive(Debug, Clone)]
pub struct StreamProgress {
	kind: RecordKind,
	/// Cursor when the loop resumed
	start_height: Option<u64>,
	/// Current cursor
	cursor: Option<u64>,
	records_written: usize,
	duplicates_skipped: usize,
	records_skipped: usize,
	waits: usize,
	failures: usize,
	/// Cursor at which we last logged progress
	last_logged_height: u64,
}

impl StreamProgress {
	pub fn new(kind: RecordKind) -> Self {
		Self {
			kind,
			start_height: None,
			cursor: None,
			records_written: 0,
			duplicates_skipped: 0,
			records_skipped: 0,
			waits: 0,
			failures: 0,
			last_logged_height: 0,
		}
	}

	/// Record the cursor the loop resumed from.
	pub fn record_resume(&mut self, cursor: u64) {
		self.start_height = Some(cursor);
		self.cursor = Some(cursor);
		self.last_logged_height = cursor;
	}

	/// Record a completed cycle that moved the cursor to `cursor`.
	pub fn record_cycle(&mut self, outcome: &Reconciled, cursor: u64) {
		self.records_written += outcome.written;
		self.duplicates_skipped += outcome.duplicates;
		self.records_skipped += outcome.skipped;
		self.cursor = Some(cursor);
	}

	pub fn record_wait(&mut self) {
		self.waits += 1;
	}

	pub fn record_failure(&mut self) {
		self.failures += 1;
	}

	/// Log progress every `LOG_EVERY` heights or when forced
	pub fn log_progress(&mut self, force: bool) {
		let Some(cursor) = self.cursor else {
			return;
		};

		if force || cursor.saturating_sub(self.last_logged_height) >= LOG_EVERY {
			info!(
				"{} progress: {} written, {} already stored, {} skipped, cursor at {}",
				self.kind,
				self.records_written,
				self.duplicates_skipped,
				self.records_skipped,
				cursor
			);
			self.last_logged_height = cursor;
		}
	}

	pub fn stats(&self) -> ProgressStats {
		ProgressStats {
			kind: self.kind,
			start_height: self.start_height,
			cursor: self.cursor,
			records_written: self.records_written,
			duplicates_skipped: self.duplicates_skipped,
			records_skipped: self.records_skipped,
			waits: self.waits,
			failures: self.failures,
		}
	}
}

/// Snapshot of a stream's progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressStats {
	pub kind: RecordKind,
	pub start_height: Option<u64>,
	pub cursor: Option<u64>,
	pub records_written: usize,
	pub duplicates_skipped: usize,
	pub records_skipped: usize,
	pub waits: usize,
	pub failures: usize,
}

impl ProgressStats {
	/// Get a human-readable summary
	pub fn summary(&self) -> String {
		let range = match (self.start_height, self.cursor) {
			(Some(start), Some(cursor)) => format!("from {} to {}", start, cursor),
			_ => "before resuming".to_string(),
		};
		format!(
			"{} stopped {}: {} written, {} already stored, {} skipped, {} waits, {} failed cycles",
			self.kind,
			range,
			self.records_written,
			self.duplicates_skipped,
			self.records_skipped,
			self.waits,
			self.failures
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_counts_accumulate() {
		let mut progress = StreamProgress::new(RecordKind::Blocks);
		progress.record_resume(100);
		progress.record_cycle(
			&Reconciled {
				written: 3,
				duplicates: 1,
				..Default::default()
			},
			104,
		);
		progress.record_cycle(
			&Reconciled {
				written: 10,
				skipped: 2,
				..Default::default()
			},
			114,
		);
		progress.record_wait();
		progress.record_failure();

		let stats = progress.stats();
		assert_eq!(stats.start_height, Some(100));
		assert_eq!(stats.cursor, Some(114));
		assert_eq!(stats.records_written, 13);
		assert_eq!(stats.duplicates_skipped, 1);
		assert_eq!(stats.records_skipped, 2);
		assert_eq!(stats.waits, 1);
		assert_eq!(stats.failures, 1);
		assert_eq!(
			stats.summary(),
			"blocks stopped from 100 to 114: 13 written, 1 already stored, 2 skipped, 1 waits, 1 failed cycles"
		);
	}

	#[test]
	fn test_periodic_log_marker_moves() {
		let mut progress = StreamProgress::new(RecordKind::Transactions);
		progress.record_resume(1);
		progress.record_cycle(&Reconciled::default(), 500);
		progress.log_progress(false);
		assert_eq!(progress.last_logged_height, 1);

		progress.record_cycle(&Reconciled::default(), 1001);
		progress.log_progress(false);
		assert_eq!(progress.last_logged_height, 1001);
	}

	#[test]
	fn test_summary_before_resume() {
		let progress = StreamProgress::new(RecordKind::Blocks);
		assert!(progress.stats().summary().contains("before resuming"));
	}
}
