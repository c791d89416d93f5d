//! Fixed-window request counters keyed by arbitrary strings.
//!
//! [`RateLimiter`] owns one [`RateWindow`] per key behind a single lock, so the window read,
//! the expiry check, and the increment it gates happen atomically: two concurrent callers can
//! never both observe `count < max` and both pass the limit. Server-reported limits are
//! recorded in the same table, so the next local check honors them too.

// self
use crate::{_prelude::*, http::MAX_RETRY_AFTER, policy::EndpointPolicy};

/// Fixed-window counter for one key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateWindow {
	/// Key the window counts for.
	pub key: String,
	/// Instant the current window opened.
	pub window_start: Instant,
	/// Requests admitted in the current window.
	pub count: u32,
	/// Window length captured from the policy that opened the window.
	pub window: Duration,
	/// Server-imposed block; while it lasts every check is rejected.
	pub blocked_until: Option<Instant>,
}
impl RateWindow {
	fn open(key: &str, policy: &EndpointPolicy, now: Instant) -> Self {
		Self { key: key.to_owned(), window_start: now, count: 1, window: policy.window, blocked_until: None }
	}

	fn blocked_for(&self, now: Instant) -> Option<Duration> {
		self.blocked_until.filter(|until| *until > now).map(|until| until - now)
	}

	/// Returns `true` once both the window and any server block have elapsed.
	pub fn is_expired_at(&self, now: Instant) -> bool {
		now.saturating_duration_since(self.window_start) >= self.window
			&& self.blocked_for(now).is_none()
	}
}

/// Outcome of [`RateLimiter::is_allowed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateDecision {
	/// Whether the call may proceed now.
	pub allowed: bool,
	/// Requests left in the current window after this one.
	pub remaining: u32,
	/// Advised wait before retrying; zero when allowed.
	pub retry_after: Duration,
}

/// Snapshot returned by [`RateLimiter::usage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateUsage {
	/// Requests admitted in the current window.
	pub count: u32,
	/// Window length.
	pub window: Duration,
	/// Time until the window (or server block) ends.
	pub resets_in: Duration,
	/// Whether a server-imposed block is active.
	pub server_blocked: bool,
}

/// Collection of [`RateWindow`]s keyed by caller-chosen strings.
///
/// Keys are never shared implicitly; callers namespace them (e.g. `GET:/api/customers` or
/// `GET:/api/customers@alice`) to layer per-user limits over per-endpoint limits.
#[derive(Debug, Default)]
pub struct RateLimiter {
	windows: Mutex<HashMap<String, RateWindow>>,
}
impl RateLimiter {
	/// Checks and, when admitted, counts a call for `key` at the current instant.
	pub fn is_allowed(&self, key: &str, policy: &EndpointPolicy) -> RateDecision {
		self.is_allowed_at(key, policy, Instant::now())
	}

	/// Checks and, when admitted, counts a call for `key` at `now`.
	pub fn is_allowed_at(&self, key: &str, policy: &EndpointPolicy, now: Instant) -> RateDecision {
		let mut windows = self.windows.lock();
		let Some(window) = windows.get_mut(key) else {
			windows.insert(key.to_owned(), RateWindow::open(key, policy, now));

			return admitted(policy, 1);
		};

		if let Some(blocked) = window.blocked_for(now) {
			return RateDecision { allowed: false, remaining: 0, retry_after: blocked };
		}

		let elapsed = now.saturating_duration_since(window.window_start);

		if elapsed >= policy.window || window.blocked_until.is_some() {
			*window = RateWindow::open(key, policy, now);

			return admitted(policy, 1);
		}
		if window.count < policy.max_requests {
			window.count += 1;

			return admitted(policy, window.count);
		}

		let retry_after = policy.default_retry_after.unwrap_or(policy.window - elapsed);

		RateDecision { allowed: false, remaining: 0, retry_after }
	}

	/// Force-clears the window for `key`.
	pub fn reset(&self, key: &str) {
		self.windows.lock().remove(key);
	}

	/// Marks `key` as exhausted for the server-advised duration.
	pub fn record_server_limit(&self, key: &str, retry_after: Duration) {
		self.record_server_limit_at(key, retry_after, Instant::now());
	}

	/// Marks `key` as exhausted for `retry_after`, starting at `now`.
	///
	/// Waits longer than [`MAX_RETRY_AFTER`] are clamped to it.
	pub fn record_server_limit_at(&self, key: &str, retry_after: Duration, now: Instant) {
		let retry_after = retry_after.min(MAX_RETRY_AFTER);
		let Some(until) = now.checked_add(retry_after) else {
			return;
		};
		let mut windows = self.windows.lock();
		let window = windows.entry(key.to_owned()).or_insert_with(|| RateWindow {
			key: key.to_owned(),
			window_start: now,
			count: 0,
			window: retry_after,
			blocked_until: None,
		});

		// Never shorten a longer block already in place.
		if window.blocked_until.is_none_or(|current| current < until) {
			window.blocked_until = Some(until);
		}
	}

	/// Seconds-based variant of [`record_server_limit`](Self::record_server_limit).
	pub fn record_server_limit_secs(&self, key: &str, retry_after_seconds: u64) {
		self.record_server_limit(key, Duration::from_secs(retry_after_seconds));
	}

	/// Current counters for `key`, if a window exists.
	pub fn usage(&self, key: &str) -> Option<RateUsage> {
		self.usage_at(key, Instant::now())
	}

	/// Current counters for `key` at `now`, if a window exists.
	pub fn usage_at(&self, key: &str, now: Instant) -> Option<RateUsage> {
		let windows = self.windows.lock();
		let window = windows.get(key)?;
		let blocked = window.blocked_for(now);
		let window_left =
			window.window.saturating_sub(now.saturating_duration_since(window.window_start));

		Some(RateUsage {
			count: window.count,
			window: window.window,
			resets_in: blocked.map_or(window_left, |blocked| blocked.max(window_left)),
			server_blocked: blocked.is_some(),
		})
	}

	/// Drops every fully expired window; returns how many were removed.
	pub fn cleanup(&self) -> usize {
		self.cleanup_at(Instant::now())
	}

	/// Drops every window expired at `now`; returns how many were removed.
	pub fn cleanup_at(&self, now: Instant) -> usize {
		let mut windows = self.windows.lock();
		let before = windows.len();

		windows.retain(|_, window| !window.is_expired_at(now));

		before - windows.len()
	}

	/// Number of tracked windows.
	pub fn len(&self) -> usize {
		self.windows.lock().len()
	}

	/// Returns `true` when no window is tracked.
	pub fn is_empty(&self) -> bool {
		self.windows.lock().is_empty()
	}
}

fn admitted(policy: &EndpointPolicy, count: u32) -> RateDecision {
	RateDecision {
		allowed: true,
		remaining: policy.max_requests.saturating_sub(count),
		retry_after: Duration::ZERO,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn policy(max_requests: u32, window_ms: u64) -> EndpointPolicy {
		EndpointPolicy::from_millis(max_requests, window_ms).expect("Test policy should be valid.")
	}

	#[test]
	fn fixed_window_admits_up_to_max_then_rejects() {
		let limiter = RateLimiter::default();
		let policy = policy(3, 1_000);
		let start = Instant::now();

		for expected_remaining in [2, 1, 0] {
			let decision = limiter.is_allowed_at("GET:/api/customers", &policy, start);

			assert!(decision.allowed);
			assert_eq!(decision.remaining, expected_remaining);
		}

		let rejected = limiter.is_allowed_at(
			"GET:/api/customers",
			&policy,
			start + Duration::from_millis(400),
		);

		assert!(!rejected.allowed);
		assert_eq!(rejected.retry_after, Duration::from_millis(600));

		let reopened = limiter.is_allowed_at(
			"GET:/api/customers",
			&policy,
			start + Duration::from_millis(1_000),
		);

		assert!(reopened.allowed);
		assert_eq!(
			limiter.usage_at("GET:/api/customers", start + Duration::from_millis(1_000)).map(|u| u.count),
			Some(1)
		);
	}

	#[test]
	fn rejection_prefers_policy_retry_after() {
		let limiter = RateLimiter::default();
		let policy = policy(1, 10_000).with_default_retry_after(Duration::from_secs(2));
		let now = Instant::now();

		assert!(limiter.is_allowed_at("k", &policy, now).allowed);

		let rejected = limiter.is_allowed_at("k", &policy, now);

		assert!(!rejected.allowed);
		assert_eq!(rejected.retry_after, Duration::from_secs(2));
	}

	#[test]
	fn keys_are_isolated() {
		let limiter = RateLimiter::default();
		let policy = policy(1, 1_000);
		let now = Instant::now();

		assert!(limiter.is_allowed_at("GET:/a", &policy, now).allowed);
		assert!(limiter.is_allowed_at("GET:/a@alice", &policy, now).allowed);
		assert!(!limiter.is_allowed_at("GET:/a", &policy, now).allowed);
		assert_eq!(limiter.len(), 2);
	}

	#[test]
	fn server_limit_rejects_regardless_of_local_count() {
		let limiter = RateLimiter::default();
		let policy = policy(100, 1_000);
		let now = Instant::now();

		assert!(limiter.is_allowed_at("GET:/api/invoices", &policy, now).allowed);

		limiter.record_server_limit_at("GET:/api/invoices", Duration::from_secs(60), now);

		let rejected = limiter.is_allowed_at("GET:/api/invoices", &policy, now);

		assert!(!rejected.allowed);
		assert_eq!(rejected.retry_after, Duration::from_secs(60));
		assert!(limiter.usage_at("GET:/api/invoices", now).is_some_and(|usage| usage.server_blocked));

		let after = limiter.is_allowed_at(
			"GET:/api/invoices",
			&policy,
			now + Duration::from_secs(60),
		);

		assert!(after.allowed);
		assert_eq!(after.remaining, 99);
	}

	#[test]
	fn server_limit_on_unknown_key_creates_blocked_window() {
		let limiter = RateLimiter::default();
		let now = Instant::now();

		limiter.record_server_limit_at("POST:/api/payments", Duration::from_secs(5), now);

		assert!(!limiter.is_allowed_at("POST:/api/payments", &policy(10, 1_000), now).allowed);
		assert_eq!(limiter.cleanup_at(now + Duration::from_secs(1)), 0);
		assert_eq!(limiter.cleanup_at(now + Duration::from_secs(5)), 1);
	}

	#[test]
	fn oversized_server_limits_are_clamped() {
		let limiter = RateLimiter::default();
		let now = Instant::now();

		limiter.record_server_limit_at("GET:/api/invoices", Duration::MAX, now);

		let usage = limiter.usage_at("GET:/api/invoices", now).expect("Blocked window should exist.");

		assert!(usage.server_blocked);
		assert_eq!(usage.resets_in, MAX_RETRY_AFTER);
		assert_eq!(
			limiter.is_allowed_at("GET:/api/invoices", &policy(1, 1_000), now).retry_after,
			MAX_RETRY_AFTER
		);
	}

	#[test]
	fn reset_and_cleanup_drop_windows() {
		let limiter = RateLimiter::default();
		let now = Instant::now();

		limiter.is_allowed_at("short", &policy(1, 100), now);
		limiter.is_allowed_at("long", &policy(1, 10_000), now);
		limiter.is_allowed_at("manual", &policy(1, 10_000), now);
		limiter.reset("manual");

		assert!(limiter.usage_at("manual", now).is_none());
		assert_eq!(limiter.cleanup_at(now + Duration::from_millis(100)), 1);
		assert_eq!(limiter.len(), 1);
		assert!(limiter.is_allowed_at("manual", &policy(1, 10_000), now).allowed);
	}
}
