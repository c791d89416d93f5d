//! Global retry, throttling, and housekeeping constants for a coordinator.

// self
use crate::{_prelude::*, error::ConfigError};

/// Tunables shared by every call a [`RequestCoordinator`](crate::RequestCoordinator) makes.
///
/// Deserializes from JSON with millisecond fields; omitted fields keep their defaults:
///
/// ```json
/// { "base_delay_ms": 500, "max_retries": 5, "per_user_limits": true }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
	/// First backoff delay; doubles per retry.
	#[serde(rename = "base_delay_ms", with = "millis")]
	pub base_delay: Duration,
	/// Upper bound for a single backoff delay.
	#[serde(rename = "max_delay_ms", with = "millis")]
	pub max_delay: Duration,
	/// Retry budget per call, shared by backoff retries and rate-limit retries.
	pub max_retries: u32,
	/// Upper bound for any local throttling or server-advised wait.
	#[serde(rename = "rate_limit_wait_cap_ms", with = "millis")]
	pub rate_limit_wait_cap: Duration,
	/// Timeout handed to the transport for every dispatch.
	#[serde(rename = "request_timeout_ms", with = "millis")]
	pub request_timeout: Duration,
	/// Wait assumed for 429 responses without a `Retry-After` hint.
	#[serde(rename = "default_retry_after_ms", with = "millis")]
	pub default_retry_after: Duration,
	/// Statuses retried with backoff for idempotent methods.
	pub retry_statuses: Vec<u16>,
	/// Appends the caller identity to rate-limit keys.
	pub per_user_limits: bool,
	/// Minimum spacing between opportunistic limiter cleanups.
	#[serde(rename = "cleanup_interval_ms", with = "millis")]
	pub cleanup_interval: Duration,
	/// Scales each backoff delay by a random factor in `[0.5, 1.0]`.
	pub jitter: bool,
}
impl ClientConfig {
	/// Loads a configuration document, reporting the JSON path of malformed fields.
	pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
		let de = &mut serde_json::Deserializer::from_str(raw);

		serde_path_to_error::deserialize(de).map_err(ConfigError::document)
	}

	/// Overrides the backoff base and cap.
	pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
		self.base_delay = base_delay;
		self.max_delay = max_delay;

		self
	}

	/// Overrides the retry budget.
	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries;

		self
	}

	/// Overrides the wait cap.
	pub fn with_rate_limit_wait_cap(mut self, cap: Duration) -> Self {
		self.rate_limit_wait_cap = cap;

		self
	}

	/// Overrides the per-dispatch timeout.
	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;

		self
	}

	/// Overrides the fallback 429 wait.
	pub fn with_default_retry_after(mut self, wait: Duration) -> Self {
		self.default_retry_after = wait;

		self
	}

	/// Replaces the retryable status set.
	pub fn with_retry_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
		self.retry_statuses = statuses.into_iter().collect();

		self
	}

	/// Enables or disables per-user rate-limit keys.
	pub fn with_per_user_limits(mut self, enabled: bool) -> Self {
		self.per_user_limits = enabled;

		self
	}

	/// Overrides the cleanup spacing.
	pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
		self.cleanup_interval = interval;

		self
	}

	/// Enables or disables backoff jitter.
	pub fn with_jitter(mut self, enabled: bool) -> Self {
		self.jitter = enabled;

		self
	}
}
impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			base_delay: Duration::from_millis(1_000),
			max_delay: Duration::from_millis(10_000),
			max_retries: 3,
			rate_limit_wait_cap: Duration::from_millis(30_000),
			request_timeout: Duration::from_millis(30_000),
			default_retry_after: Duration::from_millis(5_000),
			retry_statuses: vec![502, 503, 504],
			per_user_limits: false,
			cleanup_interval: Duration::from_millis(60_000),
			jitter: false,
		}
	}
}

mod millis {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn defaults_match_documented_constants() {
		let config = ClientConfig::default();

		assert_eq!(config.base_delay, Duration::from_secs(1));
		assert_eq!(config.max_delay, Duration::from_secs(10));
		assert_eq!(config.max_retries, 3);
		assert_eq!(config.rate_limit_wait_cap, Duration::from_secs(30));
		assert_eq!(config.retry_statuses, vec![502, 503, 504]);
		assert!(!config.per_user_limits);
	}

	#[test]
	fn json_overrides_keep_unlisted_defaults() {
		let config = ClientConfig::from_json_str(
			r#"{ "base_delay_ms": 250, "max_retries": 5, "retry_statuses": [503], "jitter": true }"#,
		)
		.expect("Config should load.");

		assert_eq!(config.base_delay, Duration::from_millis(250));
		assert_eq!(config.max_delay, Duration::from_secs(10));
		assert_eq!(config.max_retries, 5);
		assert_eq!(config.retry_statuses, vec![503]);
		assert!(config.jitter);

		let err = ClientConfig::from_json_str(r#"{ "max_delay_ms": "ten" }"#)
			.expect_err("String delay should be rejected.");

		assert!(matches!(err, ConfigError::Document { ref path, .. } if path == "max_delay_ms"));
	}
}
