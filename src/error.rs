//! Normalized error taxonomy shared by the coordinator, its collaborators, and observers.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`AppError`] by default.
pub type Result<T, E = AppError> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Closed set of failure classes every transport or protocol failure is mapped into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
	/// No response was received (timeout, refused connection, DNS failure).
	NetworkError,
	/// Any 4xx status without a more specific class.
	BadRequest,
	/// HTTP 401; credentials are missing or expired.
	Unauthorized,
	/// HTTP 403.
	Forbidden,
	/// HTTP 404.
	NotFound,
	/// HTTP 409.
	Conflict,
	/// HTTP 422 or a structured field-errors payload.
	ValidationError,
	/// HTTP 429.
	RateLimited,
	/// HTTP 500/502/503/504.
	ServerError,
	/// Anything the normalizer could not place.
	Unknown,
}
impl ErrorCode {
	/// Returns a stable label suitable for presentation mapping, span fields, or metrics.
	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorCode::NetworkError => "network_error",
			ErrorCode::BadRequest => "bad_request",
			ErrorCode::Unauthorized => "unauthorized",
			ErrorCode::Forbidden => "forbidden",
			ErrorCode::NotFound => "not_found",
			ErrorCode::Conflict => "conflict",
			ErrorCode::ValidationError => "validation_error",
			ErrorCode::RateLimited => "rate_limited",
			ErrorCode::ServerError => "server_error",
			ErrorCode::Unknown => "unknown",
		}
	}

	/// Generic message used when the failure payload carries nothing better.
	pub const fn default_message(self) -> &'static str {
		match self {
			ErrorCode::NetworkError => "Unable to reach the server.",
			ErrorCode::BadRequest => "The request was rejected by the server.",
			ErrorCode::Unauthorized => "Authentication is required.",
			ErrorCode::Forbidden => "You do not have permission to perform this action.",
			ErrorCode::NotFound => "The requested resource was not found.",
			ErrorCode::Conflict => "The request conflicts with the current state of the resource.",
			ErrorCode::ValidationError => "The submitted data is invalid.",
			ErrorCode::RateLimited => "Too many requests; please slow down.",
			ErrorCode::ServerError => "The server failed to process the request.",
			ErrorCode::Unknown => "An unexpected error occurred.",
		}
	}
}
impl Display for ErrorCode {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Normalized failure returned to callers and broadcast to observers.
///
/// Values are created once per failure and never mutated afterwards; deduplicated callers
/// receive clones of the same value.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("{message}")]
pub struct AppError {
	/// Human-readable message extracted from the payload or derived from the status.
	pub message: String,
	/// Taxonomy class.
	pub code: ErrorCode,
	/// HTTP status, when a response was received.
	pub http_status: Option<u16>,
	/// Offending field for validation failures.
	pub field: Option<String>,
	/// Advised wait for [`ErrorCode::RateLimited`] failures.
	pub retry_after: Option<Duration>,
	/// Creation instant (UTC).
	pub timestamp: OffsetDateTime,
}
impl AppError {
	/// Creates an error stamped with the current UTC instant.
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			code,
			http_status: None,
			field: None,
			retry_after: None,
			timestamp: OffsetDateTime::now_utc(),
		}
	}

	/// Creates an error carrying the code's generic message.
	pub fn from_code(code: ErrorCode) -> Self {
		Self::new(code, code.default_message())
	}

	/// Attaches the HTTP status.
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Attaches the offending field name.
	pub fn with_field(mut self, field: impl Into<String>) -> Self {
		self.field = Some(field.into());

		self
	}

	/// Attaches the advised wait.
	pub fn with_retry_after(mut self, wait: Duration) -> Self {
		self.retry_after = Some(wait);

		self
	}

	/// Returns `true` when the error carries the provided code.
	pub fn is(&self, code: ErrorCode) -> bool {
		self.code == code
	}
}

/// Configuration and construction failures raised before any request is sent.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// A policy declared zero requests per window.
	#[error("Policy `{key}` must allow at least one request per window.")]
	ZeroMaxRequests {
		/// Policy match key (`METHOD:path` or `default`).
		key: String,
	},
	/// A policy declared an empty window.
	#[error("Policy `{key}` must declare a window longer than zero.")]
	ZeroWindow {
		/// Policy match key (`METHOD:path` or `default`).
		key: String,
	},
	/// A policy names an HTTP method the client does not know.
	#[error("Policy references unsupported HTTP method `{method}`.")]
	UnknownMethod {
		/// Raw method string.
		method: String,
	},
	/// A JSON configuration document could not be decoded.
	#[error("Configuration document is invalid at `{path}`.")]
	Document {
		/// JSON path of the failing field.
		path: String,
		/// Underlying decoding failure.
		#[source]
		source: serde_json::Error,
	},
	/// HTTP transport could not be constructed.
	#[error("HTTP transport could not be constructed.")]
	TransportBuild {
		/// Underlying builder failure.
		#[source]
		source: BoxError,
	},
	/// A base URL could not be parsed.
	#[error("Base URL `{url}` is invalid: {reason}.")]
	InvalidBaseUrl {
		/// Raw URL string.
		url: String,
		/// Parser explanation.
		reason: String,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn transport_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::TransportBuild { source: Box::new(src) }
	}

	pub(crate) fn document(err: serde_path_to_error::Error<serde_json::Error>) -> Self {
		let path = err.path().to_string();

		Self::Document { path, source: err.into_inner() }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::transport_build(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn app_error_displays_message_and_keeps_metadata() {
		let err = AppError::new(ErrorCode::ValidationError, "Enter a valid email address.")
			.with_http_status(422)
			.with_field("email");

		assert_eq!(err.to_string(), "Enter a valid email address.");
		assert_eq!(err.http_status, Some(422));
		assert_eq!(err.field.as_deref(), Some("email"));
		assert!(err.is(ErrorCode::ValidationError));
	}

	#[test]
	fn error_codes_serialize_with_stable_labels() {
		let payload = serde_json::to_string(&ErrorCode::RateLimited)
			.expect("ErrorCode should serialize to JSON.");

		assert_eq!(payload, "\"rate_limited\"");
		assert_eq!(ErrorCode::NetworkError.to_string(), "network_error");
	}

	#[test]
	fn document_errors_report_the_failing_path() {
		#[derive(Debug, Deserialize)]
		struct Doc {
			#[allow(dead_code)]
			limit: u32,
		}

		let de = &mut serde_json::Deserializer::from_str("{\"limit\":\"ten\"}");
		let err = serde_path_to_error::deserialize::<_, Doc>(de)
			.expect_err("String limit should fail to decode.");
		let err = ConfigError::document(err);

		assert!(matches!(&err, ConfigError::Document { path, .. } if path == "limit"));
		assert!(StdError::source(&err).is_some());
	}
}
