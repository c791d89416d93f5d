//! Transport primitives the coordinator dispatches through.
//!
//! The module exposes [`ApiTransport`] alongside [`HttpRequest`] and [`TransportFailure`] so
//! downstream crates can plug in any HTTP stack. Implementations must keep two outcomes
//! apart: a response with any status (returned as `Ok`) and the absence of a response
//! (returned as `Err`). The coordinator classifies statuses itself.

// crates.io
use serde_json::Value;
use time::format_description::well_known::Rfc2822;
#[cfg(feature = "reqwest")] use url::Url;
// self
use crate::{_prelude::*, request::{ApiResponse, Method}};
#[cfg(feature = "reqwest")] use crate::error::ConfigError;

/// Boxed future returned by [`ApiTransport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<ApiResponse, TransportFailure>> + 'a + Send>>;

/// Abstraction over HTTP stacks capable of executing one request.
///
/// The trait is the coordinator's only dependency on the network. Implementations must be
/// `Send + Sync + 'static` so they can be shared across coordinator clones and in-flight
/// calls, and the futures they return must be `Send`.
pub trait ApiTransport
where
	Self: 'static + Send + Sync,
{
	/// Executes `request`, honoring its timeout.
	fn send(&self, request: HttpRequest) -> TransportFuture<'_>;
}

/// Fully resolved request handed to an [`ApiTransport`].
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
	/// HTTP method.
	pub method: Method,
	/// Path relative to the transport's base URL.
	pub path: String,
	/// Query parameters.
	pub query: Vec<(String, String)>,
	/// Request headers, including any injected credential.
	pub headers: Vec<(String, String)>,
	/// Optional JSON body.
	pub body: Option<Value>,
	/// Upper bound for the whole exchange.
	pub timeout: Duration,
}
impl HttpRequest {
	/// Returns the header value for `name`, ignoring ASCII case.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}
}

/// Failure raised when no response was received.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum TransportFailure {
	/// The exchange exceeded its timeout.
	#[error("Request timed out after {0:?}.")]
	Timeout(Duration),
	/// The connection could not be established.
	#[error("Connection failed: {0}.")]
	Connect(String),
	/// Any other failure before a response arrived.
	#[error("Transport failed: {0}.")]
	Other(String),
}

/// Longest server-advised wait honored; larger hints are clamped to it.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Parses a `Retry-After` value in either delta-seconds or HTTP-date form.
///
/// The result never exceeds [`MAX_RETRY_AFTER`].
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
	let raw = raw.trim();
	let wait = if let Ok(secs) = raw.parse::<u64>() {
		Some(Duration::from_secs(secs))
	} else if let Ok(secs) = raw.parse::<f64>() {
		seconds_f64(secs)
	} else if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() { Duration::try_from(delta).ok() } else { None }
	} else {
		None
	};

	wait.map(|wait| wait.min(MAX_RETRY_AFTER))
}

/// Converts fractional seconds, rejecting negative and non-finite values.
pub(crate) fn seconds_f64(secs: f64) -> Option<Duration> {
	if !secs.is_finite() || secs < 0. {
		return None;
	}
	if secs >= MAX_RETRY_AFTER.as_secs_f64() {
		return Some(MAX_RETRY_AFTER);
	}

	Duration::try_from_secs_f64(secs).ok()
}

/// Thin wrapper around [`ReqwestClient`] that resolves request paths against a base URL.
///
/// Responses with any status are returned as [`ApiResponse`]; only failures without a
/// response become [`TransportFailure`]s.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
	client: ReqwestClient,
	base_url: Url,
}
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Builds a transport around a default reqwest client.
	pub fn new(base_url: &str) -> Result<Self, ConfigError> {
		Self::with_client(ReqwestClient::builder().build()?, base_url)
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient, base_url: &str) -> Result<Self, ConfigError> {
		let mut base_url = Url::parse(base_url).map_err(|err| ConfigError::InvalidBaseUrl {
			url: base_url.to_owned(),
			reason: err.to_string(),
		})?;

		// `Url::join` drops the last segment unless the base ends with a slash.
		if !base_url.path().ends_with('/') {
			let path = format!("{}/", base_url.path());

			base_url.set_path(&path);
		}

		Ok(Self { client, base_url })
	}

	/// Base URL every request path is joined onto.
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	fn resolve(&self, path: &str) -> Result<Url, TransportFailure> {
		self.base_url
			.join(path.trim_start_matches('/'))
			.map_err(|err| TransportFailure::Other(format!("invalid request path `{path}`: {err}")))
	}
}
#[cfg(feature = "reqwest")]
impl ApiTransport for ReqwestTransport {
	fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
		Box::pin(async move {
			let url = self.resolve(&request.path)?;
			let method = match request.method {
				Method::Get => reqwest::Method::GET,
				Method::Head => reqwest::Method::HEAD,
				Method::Post => reqwest::Method::POST,
				Method::Put => reqwest::Method::PUT,
				Method::Patch => reqwest::Method::PATCH,
				Method::Delete => reqwest::Method::DELETE,
			};
			let mut builder =
				self.client.request(method, url).query(&request.query).timeout(request.timeout);

			for (name, value) in &request.headers {
				builder = builder.header(name.as_str(), value.as_str());
			}
			if let Some(body) = &request.body {
				builder = builder.json(body);
			}

			let response =
				builder.send().await.map_err(|err| map_reqwest_error(&err, request.timeout))?;
			let status = response.status().as_u16();
			let headers = response
				.headers()
				.iter()
				.filter_map(|(name, value)| {
					value.to_str().ok().map(|value| (name.as_str().to_owned(), value.to_owned()))
				})
				.collect::<BTreeMap<_, _>>();
			let body = response
				.bytes()
				.await
				.map_err(|err| map_reqwest_error(&err, request.timeout))?
				.to_vec();

			Ok(ApiResponse { status, headers, body })
		})
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(err: &ReqwestError, timeout: Duration) -> TransportFailure {
	if err.is_timeout() {
		return TransportFailure::Timeout(timeout);
	}
	if err.is_connect() {
		return TransportFailure::Connect(err.to_string());
	}

	TransportFailure::Other(err.to_string())
}
