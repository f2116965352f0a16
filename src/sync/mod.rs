//! Ledger Synchronization Module
//!
//! This module keeps the local store converged with the remote ledger. Each record kind runs in
//! its own reconciliation loop; the loops share nothing but the store.
//!
//! - `synchronizer`: Spawns one loop per configured stream and owns their shutdown.
//! - `reconcile`: The per-stream loop that plans, fetches, writes and advances the cursor.
//! - `planner`: Decides whether a window is covered, beyond the tip, or needs a fetch.
//! - `streams`: Blocks and transactions, and how each one reconciles a fetched window.
//! - `retry`: Doubling backoff schedules and cancellable sleeps.
//! - `progress`: Per-stream progress counters and periodic logging.

/// Window planning and cursor advance
pub mod planner;
/// Tracks synchronization progress and statistics
pub mod progress;
/// Per-stream reconciliation loop
pub mod reconcile;
/// Backoff schedules
pub mod retry;
/// Record streams mirrored from the ledger
pub mod streams;
/// Loop supervisor
pub mod synchronizer;
/// Configuration and error types
pub mod types;

pub use retry::RetryPolicy;
pub use synchronizer::Synchronizer;
pub use types::*;
