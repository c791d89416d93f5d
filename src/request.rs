//! Request descriptions, buffered responses, and the keys derived from them.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, error::ConfigError, http};

/// HTTP methods understood by the client layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	/// `GET`
	Get,
	/// `HEAD`
	Head,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `PATCH`
	Patch,
	/// `DELETE`
	Delete,
}
impl Method {
	/// Returns the canonical upper-case method name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Method::Get => "GET",
			Method::Head => "HEAD",
			Method::Post => "POST",
			Method::Put => "PUT",
			Method::Patch => "PATCH",
			Method::Delete => "DELETE",
		}
	}

	/// Safe methods that may be re-sent without changing server state.
	pub const fn is_idempotent(self) -> bool {
		matches!(self, Method::Get | Method::Head)
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for Method {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_uppercase().as_str() {
			"GET" => Ok(Method::Get),
			"HEAD" => Ok(Method::Head),
			"POST" => Ok(Method::Post),
			"PUT" => Ok(Method::Put),
			"PATCH" => Ok(Method::Patch),
			"DELETE" => Ok(Method::Delete),
			_ => Err(ConfigError::UnknownMethod { method: s.to_owned() }),
		}
	}
}

/// Description of a single logical call issued through the coordinator.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestSpec {
	/// HTTP method.
	pub method: Method,
	/// Path relative to the transport's base URL, as sent on the wire.
	pub path: String,
	/// Query parameters in insertion order.
	pub query: Vec<(String, String)>,
	/// Extra request headers; names are compared case-insensitively.
	pub headers: Vec<(String, String)>,
	/// Optional JSON body.
	pub body: Option<Value>,
	/// Label used for policy lookup and rate keys instead of the normalized path.
	pub endpoint: Option<String>,
	/// When set, a 401 is terminal instead of triggering a credential refresh.
	pub skip_auth_refresh: bool,
}
impl RequestSpec {
	/// Creates a request without query, headers, or body.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			method,
			path: path.into(),
			query: Vec::new(),
			headers: Vec::new(),
			body: None,
			endpoint: None,
			skip_auth_refresh: false,
		}
	}

	/// Shorthand for a `GET` request.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::Get, path)
	}

	/// Shorthand for a `POST` request carrying a JSON body.
	pub fn post(path: impl Into<String>, body: Value) -> Self {
		Self::new(Method::Post, path).with_body(body)
	}

	/// Appends a query parameter.
	pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((key.into(), value.into()));

		self
	}

	/// Appends a request header.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));

		self
	}

	/// Sets the JSON body.
	pub fn with_body(mut self, body: Value) -> Self {
		self.body = Some(body);

		self
	}

	/// Overrides the endpoint label used for policy lookup and rate keys.
	pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.endpoint = Some(endpoint.into());

		self
	}

	/// Marks the request so a 401 is returned instead of refreshing credentials.
	pub fn skip_auth_refresh(mut self) -> Self {
		self.skip_auth_refresh = true;

		self
	}

	/// Returns the header value for `name`, ignoring ASCII case.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}

	/// Endpoint label: the explicit override or the normalized path.
	pub fn endpoint_label(&self) -> String {
		self.endpoint.clone().unwrap_or_else(|| normalize_path(&self.path))
	}

	/// Rate-limit key shared by every call to the same method + endpoint.
	pub fn rate_key(&self) -> String {
		format!("{}:{}", self.method, self.endpoint_label())
	}

	/// Deterministic key identifying logically identical concurrent calls.
	///
	/// The key combines the method, the normalized path, and a SHA-256 fingerprint over the
	/// raw query string of `path`, the sorted query parameters, the sorted caller headers, and
	/// the canonical JSON body. Every fingerprint field is length-prefixed, so values that
	/// contain separators cannot collide with differently split ones.
	pub fn dedup_key(&self) -> String {
		let mut query = self.query.iter().collect::<Vec<_>>();

		query.sort();

		let mut headers = self
			.headers
			.iter()
			.map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
			.collect::<Vec<_>>();

		headers.sort();

		let mut hasher = Sha256::new();

		fingerprint_field(&mut hasher, self.path.split_once('?').map_or("", |(_, raw)| raw));
		fingerprint_field(&mut hasher, &query.len().to_string());

		for (key, value) in query {
			fingerprint_field(&mut hasher, key);
			fingerprint_field(&mut hasher, value);
		}

		fingerprint_field(&mut hasher, &headers.len().to_string());

		for (name, value) in &headers {
			fingerprint_field(&mut hasher, name);
			fingerprint_field(&mut hasher, value);
		}

		if let Some(body) = &self.body {
			fingerprint_field(&mut hasher, &body.to_string());
		}

		let fingerprint = STANDARD_NO_PAD.encode(hasher.finalize());

		format!("{} {} {fingerprint}", self.method, normalize_path(&self.path))
	}
}

fn fingerprint_field(hasher: &mut Sha256, field: &str) {
	hasher.update((field.len() as u64).to_be_bytes());
	hasher.update(field.as_bytes());
}

/// Buffered response returned by an [`ApiTransport`](crate::http::ApiTransport).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Response headers keyed by lower-case name.
	pub headers: BTreeMap<String, String>,
	/// Raw body bytes.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Creates a response with the given status and an empty body.
	pub fn new(status: u16) -> Self {
		Self { status, ..Default::default() }
	}

	/// Creates a response with a JSON body.
	pub fn json(status: u16, body: &Value) -> Self {
		Self::new(status)
			.with_header("content-type", "application/json")
			.with_body(body.to_string().into_bytes())
	}

	/// Adds a header, lower-casing its name.
	pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
		self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());

		self
	}

	/// Replaces the body.
	pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = body.into();

		self
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Returns the header value for `name`, ignoring ASCII case.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Advised wait parsed from the `Retry-After` header, if present.
	pub fn retry_after(&self) -> Option<Duration> {
		self.header("retry-after").and_then(http::parse_retry_after)
	}

	/// Decodes the body as JSON, reporting the path of the first failing field.
	pub fn decode<T>(&self) -> Result<T, serde_path_to_error::Error<serde_json::Error>>
	where
		T: DeserializeOwned,
	{
		let de = &mut serde_json::Deserializer::from_slice(&self.body);

		serde_path_to_error::deserialize(de)
	}
}

/// Canonical form of a request path used for keys: leading slash, no duplicate or trailing
/// slashes, and no query string or fragment.
pub fn normalize_path(path: &str) -> String {
	let path = path.trim();
	let path = path.split(['?', '#']).next().unwrap_or_default();
	let mut normalized = String::with_capacity(path.len() + 1);

	for segment in path.split('/').filter(|segment| !segment.is_empty()) {
		normalized.push('/');
		normalized.push_str(segment);
	}

	if normalized.is_empty() {
		normalized.push('/');
	}

	normalized
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;

	#[test]
	fn paths_normalize_slashes_and_strip_queries() {
		assert_eq!(normalize_path("api/customers/"), "/api/customers");
		assert_eq!(normalize_path("//api//customers?page=2"), "/api/customers");
		assert_eq!(normalize_path(""), "/");
		assert_eq!(normalize_path("/"), "/");
	}

	#[test]
	fn dedup_key_ignores_query_order_and_body_key_order() {
		let lhs = RequestSpec::get("/api/invoices/")
			.with_query("page", "2")
			.with_query("status", "open")
			.with_body(json!({ "a": 1, "b": 2 }));
		let rhs = RequestSpec::get("/api/invoices")
			.with_query("status", "open")
			.with_query("page", "2")
			.with_body(json!({ "b": 2, "a": 1 }));

		assert_eq!(lhs.dedup_key(), rhs.dedup_key());
	}

	#[test]
	fn dedup_key_separates_methods_params_and_bodies() {
		let base = RequestSpec::get("/api/routers");

		assert_ne!(base.dedup_key(), RequestSpec::new(Method::Head, "/api/routers").dedup_key());
		assert_ne!(base.dedup_key(), base.clone().with_query("page", "1").dedup_key());
		assert_ne!(
			RequestSpec::post("/api/routers", json!({ "name": "core-1" })).dedup_key(),
			RequestSpec::post("/api/routers", json!({ "name": "core-2" })).dedup_key(),
		);
	}

	#[test]
	fn dedup_key_keeps_inline_queries_and_separators_apart() {
		assert_ne!(
			RequestSpec::get("/api/customers?page=1").dedup_key(),
			RequestSpec::get("/api/customers?page=2").dedup_key(),
		);
		assert_ne!(
			RequestSpec::get("/api/customers").with_query("a", "b&c=d").dedup_key(),
			RequestSpec::get("/api/customers").with_query("a", "b").with_query("c", "d").dedup_key(),
		);
		assert_ne!(
			RequestSpec::get("/api/customers").with_query("a=b", "").dedup_key(),
			RequestSpec::get("/api/customers").with_query("a", "=b").dedup_key(),
		);
	}

	#[test]
	fn dedup_key_includes_caller_headers() {
		let alice = RequestSpec::get("/api/me").with_header("Authorization", "Bearer alice");
		let bob = RequestSpec::get("/api/me").with_header("Authorization", "Bearer bob");

		assert_ne!(alice.dedup_key(), bob.dedup_key());
		assert_ne!(alice.dedup_key(), RequestSpec::get("/api/me").dedup_key());
		assert_eq!(
			alice.dedup_key(),
			RequestSpec::get("/api/me").with_header("authorization", "Bearer alice").dedup_key(),
		);
	}

	#[test]
	fn rate_key_prefers_endpoint_label() {
		let spec = RequestSpec::get("/api/customers/42/").with_endpoint("/api/customers/{id}");

		assert_eq!(spec.rate_key(), "GET:/api/customers/{id}");
		assert_eq!(RequestSpec::get("/api/customers/").rate_key(), "GET:/api/customers");
	}

	#[test]
	fn methods_parse_case_insensitively_and_classify_idempotency() {
		assert_eq!(Method::from_str("patch").expect("Lower-case method should parse."), Method::Patch);
		assert!(Method::from_str("TRACE").is_err());
		assert!(Method::Get.is_idempotent());
		assert!(Method::Head.is_idempotent());
		assert!(!Method::Post.is_idempotent());
		assert!(!Method::Delete.is_idempotent());
	}

	#[test]
	fn response_headers_are_case_insensitive() {
		let response = ApiResponse::new(429).with_header("Retry-After", "7");

		assert_eq!(response.header("retry-after"), Some("7"));
		assert_eq!(response.retry_after(), Some(Duration::from_secs(7)));
		assert!(!response.is_success());
	}
}
