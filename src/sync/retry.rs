//! Backoff schedules for the reconciliation loops.
//!
//! Delays start at a base interval and double with every consecutive failure. Unless a maximum is
//! configured there is no cap: the loops are long-running and only ever wait.
//!
//! `backoff` adds up to a nanosecond of noise even with a zero randomization factor, so delays are
//! rounded to whole milliseconds.

use backoff::ExponentialBackoff;
use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Stand-in for "no cap"; far beyond any delay reached in practice.
const UNCAPPED: Duration = Duration::from_secs(u64::MAX / 1_000_000_000);

/// Parameters of a doubling backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Delay before the first retry.
	pub base: Duration,
	/// Upper bound of a single delay, if any.
	pub max_interval: Option<Duration>,
}

impl RetryPolicy {
	pub fn new(base: Duration) -> Self {
		Self {
			base,
			max_interval: None,
		}
	}

	/// Start a fresh schedule.
	pub fn schedule(&self) -> RetrySchedule {
		let inner = ExponentialBackoffBuilder::new()
			.with_initial_interval(self.base)
			.with_randomization_factor(0.0)
			.with_multiplier(2.0)
			.with_max_interval(self.max_interval.unwrap_or(UNCAPPED))
			.with_max_elapsed_time(None)
			.build();

		RetrySchedule {
			inner,
			base: self.base,
		}
	}
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self::new(Duration::from_secs(60))
	}
}

/// A running backoff: each call to [`RetrySchedule::next_delay`] doubles the following delay.
pub struct RetrySchedule {
	inner: ExponentialBackoff,
	base: Duration,
}

impl RetrySchedule {
	pub fn next_delay(&mut self) -> Duration {
		// Without an elapsed-time limit the schedule never runs out.
		whole_millis(self.inner.next_backoff().unwrap_or(self.base))
	}

	/// Return to the base delay after a success.
	pub fn reset(&mut self) {
		self.inner.reset();
	}
}

/// Round to the nearest millisecond.
fn whole_millis(delay: Duration) -> Duration {
	let millis = (delay.as_nanos() + 500_000) / 1_000_000;
	Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

/// Sleep for `delay` unless cancelled first.
///
/// Returns `false` when the token was cancelled before the delay elapsed.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
	tokio::select! {
		_ = cancel.cancelled() => false,
		_ = tokio::time::sleep(delay) => true,
	}
}
