//! Retry classification and exponential backoff.

// crates.io
use rand::Rng;
// self
use crate::{_prelude::*, coordinator::ClientConfig, request::Method};

/// What the coordinator does after a failed dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
	/// Run the refresh protocol, then re-dispatch once with the new credential.
	RefreshCredentials,
	/// Wait the server-advised delay, then re-dispatch.
	AwaitServerLimit(Duration),
	/// Wait the backoff delay, then re-dispatch.
	Backoff(Duration),
	/// Settle the call with the error.
	Surface,
}

/// Bounded retry policy derived from [`ClientConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// First backoff delay.
	pub base_delay: Duration,
	/// Backoff cap.
	pub max_delay: Duration,
	/// Retry budget shared by backoff and rate-limit retries.
	pub max_retries: u32,
	/// Statuses retried with backoff.
	pub retry_statuses: Vec<u16>,
	/// Cap applied to server-advised waits.
	pub wait_cap: Duration,
	/// Fallback for 429 responses without a hint.
	pub default_retry_after: Duration,
	/// Randomizes each backoff delay within `[0.5, 1.0]` of its nominal value.
	pub jitter: bool,
}
impl RetryPolicy {
	/// Nominal delay before retry number `retry_count + 1`: `min(base × 2^retry_count, max)`.
	pub fn backoff(&self, retry_count: u32) -> Duration {
		2_u32
			.checked_pow(retry_count)
			.and_then(|factor| self.base_delay.checked_mul(factor))
			.map_or(self.max_delay, |delay| delay.min(self.max_delay))
	}

	/// [`backoff`](Self::backoff) with jitter applied when enabled.
	pub fn delay_for(&self, retry_count: u32) -> Duration {
		let delay = self.backoff(retry_count);

		if self.jitter { delay.mul_f64(rand::rng().random_range(0.5..=1.0)) } else { delay }
	}

	/// Returns `true` when `error` is transient enough to retry with backoff.
	pub fn is_retryable(&self, error: &AppError) -> bool {
		match error.code {
			ErrorCode::NetworkError => true,
			ErrorCode::ServerError => error
				.http_status
				.is_some_and(|status| self.retry_statuses.contains(&status)),
			_ => false,
		}
	}

	/// Chooses the follow-up for a failed dispatch.
	///
	/// `auth_retried` is set once the call has already been through the refresh protocol;
	/// a second 401 is then terminal.
	pub fn decide(
		&self,
		method: Method,
		error: &AppError,
		retry_count: u32,
		auth_retried: bool,
	) -> RetryDecision {
		if error.is(ErrorCode::Unauthorized) {
			return if auth_retried {
				RetryDecision::Surface
			} else {
				RetryDecision::RefreshCredentials
			};
		}
		if !method.is_idempotent() || retry_count >= self.max_retries {
			return RetryDecision::Surface;
		}
		if error.is(ErrorCode::RateLimited) {
			let wait = error.retry_after.unwrap_or(self.default_retry_after);

			return RetryDecision::AwaitServerLimit(wait.min(self.wait_cap));
		}
		if self.is_retryable(error) {
			return RetryDecision::Backoff(self.delay_for(retry_count));
		}

		RetryDecision::Surface
	}
}
impl From<&ClientConfig> for RetryPolicy {
	fn from(config: &ClientConfig) -> Self {
		Self {
			base_delay: config.base_delay,
			max_delay: config.max_delay,
			max_retries: config.max_retries,
			retry_statuses: config.retry_statuses.clone(),
			wait_cap: config.rate_limit_wait_cap,
			default_retry_after: config.default_retry_after,
			jitter: config.jitter,
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self::from(&ClientConfig::default())
	}
}
