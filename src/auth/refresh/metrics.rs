// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing how 401-triggered refresh cycles played out.
///
/// `attempts` only counts provider refreshes that actually ran; calls that parked behind a
/// running cycle show up in `joined`, and cycles whose leading call was dropped before the
/// provider settled show up in `abandoned`.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
	attempts: AtomicU64,
	succeeded: AtomicU64,
	failed: AtomicU64,
	joined: AtomicU64,
	abandoned: AtomicU64,
}
impl RefreshMetrics {
	/// Provider refreshes executed.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Cycles that rotated the access token.
	pub fn successes(&self) -> u64 {
		self.succeeded.load(Ordering::Relaxed)
	}

	/// Cycles that ended in cleared credentials and a login redirect.
	pub fn failures(&self) -> u64 {
		self.failed.load(Ordering::Relaxed)
	}

	/// Calls that queued behind an in-flight refresh instead of starting one.
	pub fn joined(&self) -> u64 {
		self.joined.load(Ordering::Relaxed)
	}

	/// Queued calls that had to re-enter because their leader was dropped.
	pub fn abandoned(&self) -> u64 {
		self.abandoned.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.succeeded.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failed.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_joined(&self) {
		self.joined.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_abandoned(&self) {
		self.abandoned.fetch_add(1, Ordering::Relaxed);
	}
}
