//! Window planning for a single stream.
//!
//! Given a cursor, the planner decides whether the next window is already fully persisted,
//! lies beyond the ledger's frontier, or has to be fetched. It also owns the cursor advance
//! rule applied after a fetch.

use crate::ledger::{LedgerClient, Window};
use crate::store::{RecordKind, Store};
use crate::sync::types::SyncError;
use std::collections::BTreeSet;
use tracing::debug;

/// Outcome of planning one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
	/// Every height of the window is already persisted.
	Covered { window: Window },
	/// The window reaches past the ledger tip; try again later.
	Wait { window: Window, tip: u64 },
	/// Fetch the window; `existing` lists heights already persisted.
	Fetch {
		window: Window,
		existing: BTreeSet<u64>,
	},
}

/// Plans fetch windows of a fixed size for one record kind
#[derive(Debug, Clone, Copy)]
pub struct WindowPlanner {
	kind: RecordKind,
	window_size: u64,
}

impl WindowPlanner {
	pub fn new(kind: RecordKind, window_size: u64) -> Self {
		Self {
			kind,
			window_size: window_size.max(1),
		}
	}

	pub fn window_size(&self) -> u64 {
		self.window_size
	}

	/// Plan the cycle starting at `cursor`.
	///
	/// The tip is only queried for windows that are not fully persisted, and no fetch is
	/// planned for a window whose last height lies beyond the tip.
	pub async fn plan(
		&self,
		cursor: u64,
		store: &dyn Store,
		ledger: &dyn LedgerClient,
	) -> Result<Plan, SyncError> {
		let window = Window::starting_at(cursor, self.window_size);
		let existing = store.existing_heights(self.kind, window).await?;

		if existing.len() as u64 >= window.size() {
			debug!("{} window {} already persisted", self.kind, window);
			return Ok(Plan::Covered { window });
		}

		let tip = ledger.tip_height().await?;
		if window.to > tip {
			return Ok(Plan::Wait { window, tip });
		}

		Ok(Plan::Fetch { window, existing })
	}

	/// The cursor following a fetch of `window`.
	///
	/// Moves to one past the highest height the ledger returned within the window, so heights
	/// the ledger skipped are asked for again. An empty response moves past the whole window.
	pub fn next_cursor(window: Window, highest_returned: Option<u64>) -> u64 {
		match highest_returned.filter(|height| window.contains(*height)) {
			Some(height) => height.saturating_add(1),
			None => window.to.saturating_add(1),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::{Block, LedgerError, MockLedgerClient};
	use crate::store::memory::MemoryStore;
	use chrono::Utc;

	fn block(height: u64) -> Block {
		Block {
			height,
			time: Utc::now(),
			version: "v1".to_string(),
			chain_id: "test".to_string(),
			proposer_address_raw: "p".to_string(),
		}
	}

	async fn store_with(heights: impl IntoIterator<Item = u64>) -> MemoryStore {
		let store = MemoryStore::new();
		for height in heights {
			store.upsert_block(&block(height)).await.unwrap();
		}
		store
	}

	#[tokio::test]
	async fn test_waits_at_frontier() {
		let store = MemoryStore::new();
		let mut ledger = MockLedgerClient::new();
		ledger.expect_tip_height().times(1).returning(|| Ok(105));
		ledger.expect_fetch_blocks().times(0);

		let planner = WindowPlanner::new(RecordKind::Blocks, 10);
		let plan = planner.plan(100, &store, &ledger).await.unwrap();
		assert_eq!(
			plan,
			Plan::Wait {
				window: Window::starting_at(100, 10),
				tip: 105
			}
		);
	}

	#[tokio::test]
	async fn test_window_ending_at_tip_is_fetched() {
		let store = store_with([101, 104]).await;
		let mut ledger = MockLedgerClient::new();
		ledger.expect_tip_height().returning(|| Ok(109));

		let planner = WindowPlanner::new(RecordKind::Blocks, 10);
		let plan = planner.plan(100, &store, &ledger).await.unwrap();
		assert_eq!(
			plan,
			Plan::Fetch {
				window: Window::starting_at(100, 10),
				existing: BTreeSet::from([101, 104]),
			}
		);
	}

	#[tokio::test]
	async fn test_covered_window_skips_tip_query() {
		let store = store_with(100..=109).await;
		let mut ledger = MockLedgerClient::new();
		ledger.expect_tip_height().times(0);

		let planner = WindowPlanner::new(RecordKind::Blocks, 10);
		let plan = planner.plan(100, &store, &ledger).await.unwrap();
		assert_eq!(
			plan,
			Plan::Covered {
				window: Window::starting_at(100, 10)
			}
		);
	}

	#[tokio::test]
	async fn test_tip_failure_propagates() {
		let store = MemoryStore::new();
		let mut ledger = MockLedgerClient::new();
		ledger
			.expect_tip_height()
			.returning(|| Err(LedgerError::Decode("missing data".to_string())));

		let planner = WindowPlanner::new(RecordKind::Blocks, 10);
		let err = planner.plan(100, &store, &ledger).await.unwrap_err();
		assert!(err.needs_attention());
	}

	#[test]
	fn test_sparse_response_advances_past_highest_returned() {
		let window = Window::starting_at(100, 10);
		assert_eq!(WindowPlanner::next_cursor(window, Some(103)), 104);
		assert_eq!(WindowPlanner::next_cursor(window, Some(109)), 110);
	}

	#[test]
	fn test_empty_response_advances_by_window() {
		let window = Window::starting_at(100, 10);
		assert_eq!(WindowPlanner::next_cursor(window, None), 110);
	}

	#[test]
	fn test_out_of_window_height_is_ignored() {
		let window = Window::starting_at(100, 10);
		assert_eq!(WindowPlanner::next_cursor(window, Some(250)), 110);
	}

	#[test]
	fn test_cursor_sequence_has_no_gaps() {
		// Remote holds every height except multiples of 7.
		let mut cursor = 1;
		let mut covered = BTreeSet::new();
		while cursor < 500 {
			let window = Window::starting_at(cursor, 10);
			let highest = (window.from..=window.to).filter(|h| h % 7 != 0).max();
			covered.extend(window.from..=window.to);
			let next = WindowPlanner::next_cursor(window, highest);
			assert!(next > cursor);
			assert!(next <= window.to + 1);
			cursor = next;
		}
		assert!((1..cursor).all(|h| covered.contains(&h)));
	}
}
