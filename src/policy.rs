//! Static endpoint rate-limit policies with a global fallback.

// self
use crate::{_prelude::*, error::ConfigError, request::{self, Method}};

/// Rate-limit policy applied to one `(method, path pattern)` pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointPolicy {
	/// Maximum requests admitted per window; always at least one.
	pub max_requests: u32,
	/// Fixed window length; always longer than zero.
	pub window: Duration,
	/// Wait advised to rejected callers; falls back to the window remainder when unset.
	pub default_retry_after: Option<Duration>,
}
impl EndpointPolicy {
	/// Creates a validated policy.
	pub fn new(max_requests: u32, window: Duration) -> Result<Self, ConfigError> {
		Self::validated("policy", max_requests, window, None)
	}

	/// Millisecond-based constructor mirroring the configuration table.
	pub fn from_millis(max_requests: u32, window_ms: u64) -> Result<Self, ConfigError> {
		Self::new(max_requests, Duration::from_millis(window_ms))
	}

	/// Sets the advised wait for rejected callers.
	pub fn with_default_retry_after(mut self, wait: Duration) -> Self {
		self.default_retry_after = Some(wait);

		self
	}

	fn validated(
		key: &str,
		max_requests: u32,
		window: Duration,
		default_retry_after: Option<Duration>,
	) -> Result<Self, ConfigError> {
		if max_requests == 0 {
			return Err(ConfigError::ZeroMaxRequests { key: key.to_owned() });
		}
		if window.is_zero() {
			return Err(ConfigError::ZeroWindow { key: key.to_owned() });
		}

		Ok(Self { max_requests, window, default_retry_after })
	}
}
impl Default for EndpointPolicy {
	fn default() -> Self {
		Self { max_requests: 60, window: Duration::from_secs(60), default_retry_after: None }
	}
}

/// Immutable lookup table from `METHOD:path` to [`EndpointPolicy`].
///
/// Patterns are stored in normalized path form, so `/api/auth/login/` and `/api/auth/login`
/// name the same entry. Lookups match the exact method + pattern pair first and fall back to
/// the default policy otherwise. The registry is read-only after construction.
#[derive(Clone, Debug, Default)]
pub struct EndpointPolicyRegistry {
	policies: HashMap<(Method, String), EndpointPolicy>,
	default: EndpointPolicy,
}
impl EndpointPolicyRegistry {
	/// Returns a builder seeded with the stock default policy.
	pub fn builder() -> EndpointPolicyRegistryBuilder {
		EndpointPolicyRegistryBuilder::default()
	}

	/// Loads a registry from the JSON table format.
	///
	/// ```json
	/// {
	///   "default": { "max_requests": 60, "window_ms": 60000 },
	///   "endpoints": [
	///     { "method": "POST", "path": "/api/auth/login", "max_requests": 5,
	///       "window_ms": 60000, "retry_after_ms": 60000 }
	///   ]
	/// }
	/// ```
	pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
		let de = &mut serde_json::Deserializer::from_str(raw);
		let table: PolicyTable =
			serde_path_to_error::deserialize(de).map_err(ConfigError::document)?;

		table.try_into()
	}

	/// Resolves the policy for a method + path pattern.
	pub fn policy_for(&self, method: Method, path: &str) -> &EndpointPolicy {
		self.policies.get(&(method, request::normalize_path(path))).unwrap_or(&self.default)
	}

	/// Fallback policy applied to unmatched endpoints.
	pub fn default_policy(&self) -> &EndpointPolicy {
		&self.default
	}

	/// Number of endpoint-specific policies.
	pub fn len(&self) -> usize {
		self.policies.len()
	}

	/// Returns `true` when only the default policy is configured.
	pub fn is_empty(&self) -> bool {
		self.policies.is_empty()
	}
}

/// Builder for [`EndpointPolicyRegistry`].
#[derive(Debug, Default)]
pub struct EndpointPolicyRegistryBuilder {
	policies: HashMap<(Method, String), EndpointPolicy>,
	default: EndpointPolicy,
}
impl EndpointPolicyRegistryBuilder {
	/// Registers (or replaces) the policy for `method` + `path`.
	pub fn endpoint(mut self, method: Method, path: impl AsRef<str>, policy: EndpointPolicy) -> Self {
		self.policies.insert((method, request::normalize_path(path.as_ref())), policy);

		self
	}

	/// Replaces the fallback policy.
	pub fn default_policy(mut self, policy: EndpointPolicy) -> Self {
		self.default = policy;

		self
	}

	/// Finalizes the registry.
	pub fn build(self) -> EndpointPolicyRegistry {
		EndpointPolicyRegistry { policies: self.policies, default: self.default }
	}
}

#[derive(Debug, Deserialize)]
struct PolicyTable {
	#[serde(default)]
	default: Option<PolicyEntry>,
	#[serde(default)]
	endpoints: Vec<EndpointEntry>,
}

#[derive(Debug, Deserialize)]
struct PolicyEntry {
	max_requests: u32,
	window_ms: u64,
	#[serde(default)]
	retry_after_ms: Option<u64>,
}
impl PolicyEntry {
	fn into_policy(self, key: &str) -> Result<EndpointPolicy, ConfigError> {
		EndpointPolicy::validated(
			key,
			self.max_requests,
			Duration::from_millis(self.window_ms),
			self.retry_after_ms.map(Duration::from_millis),
		)
	}
}

#[derive(Debug, Deserialize)]
struct EndpointEntry {
	method: String,
	path: String,
	#[serde(flatten)]
	policy: PolicyEntry,
}

impl TryFrom<PolicyTable> for EndpointPolicyRegistry {
	type Error = ConfigError;

	fn try_from(table: PolicyTable) -> Result<Self, Self::Error> {
		let mut builder = Self::builder();

		if let Some(entry) = table.default {
			builder = builder.default_policy(entry.into_policy("default")?);
		}

		for entry in table.endpoints {
			let method = Method::from_str(&entry.method)?;
			let key = format!("{method}:{}", entry.path);
			let policy = entry.policy.into_policy(&key)?;

			builder = builder.endpoint(method, entry.path, policy);
		}

		Ok(builder.build())
	}
}
