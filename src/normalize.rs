//! Classification of raw transport failures into the closed [`ErrorCode`] taxonomy.
//!
//! Failure payloads are decoded into a typed [`FailurePayload`] once, then an ordered list of
//! extractors is tried in sequence: the `message` field, the `detail` field, the first
//! validation field message, and finally the status-based default message.

// crates.io
use serde_json::Value;
// self
use crate::{_prelude::*, http::{self, TransportFailure}, request::ApiResponse};

/// Everything that can go wrong with one dispatch, before normalization.
#[derive(Clone, Debug, PartialEq)]
pub enum RawFailure {
	/// No response was received.
	NoResponse(TransportFailure),
	/// A response arrived with a non-2xx status.
	Status(ApiResponse),
	/// A 2xx response carried a body that could not be decoded.
	MalformedPayload {
		/// HTTP status of the response.
		status: u16,
		/// Decoder explanation, including the failing JSON path.
		detail: String,
	},
}

/// Pure mapping from [`RawFailure`] to [`AppError`].
#[derive(Clone, Debug)]
pub struct ErrorNormalizer {
	/// Wait advised for 429 responses without a `Retry-After` hint.
	pub default_retry_after: Duration,
}
impl ErrorNormalizer {
	/// Creates a normalizer with the provided fallback rate-limit wait.
	pub fn new(default_retry_after: Duration) -> Self {
		Self { default_retry_after }
	}

	/// Classifies `raw` into a normalized [`AppError`].
	pub fn normalize(&self, raw: &RawFailure) -> AppError {
		match raw {
			RawFailure::NoResponse(failure) => AppError::new(
				ErrorCode::NetworkError,
				format!("{} {failure}", ErrorCode::NetworkError.default_message()),
			),
			RawFailure::Status(response) => self.normalize_response(response),
			RawFailure::MalformedPayload { status, detail } => AppError::new(
				ErrorCode::Unknown,
				format!("The server returned a malformed payload: {detail}."),
			)
			.with_http_status(*status),
		}
	}

	fn normalize_response(&self, response: &ApiResponse) -> AppError {
		let payload = FailurePayload::parse(&response.body);
		let field_error = payload.first_field_error(response.status);
		let code = classify(response.status, field_error.is_some());
		let message = MESSAGE_EXTRACTORS
			.iter()
			.find_map(|extract| extract(&payload, field_error.as_ref()))
			.unwrap_or_else(|| code.default_message().to_owned());
		let mut error = AppError::new(code, message).with_http_status(response.status);

		if let (ErrorCode::ValidationError, Some(field)) =
			(code, field_error.and_then(|field_error| field_error.field))
		{
			error = error.with_field(field);
		}
		if code == ErrorCode::RateLimited {
			let wait = response
				.retry_after()
				.or(payload.retry_after)
				.unwrap_or(self.default_retry_after)
				.min(http::MAX_RETRY_AFTER);

			error = error.with_retry_after(wait);
		}

		error
	}
}
impl Default for ErrorNormalizer {
	fn default() -> Self {
		Self::new(Duration::from_secs(5))
	}
}

/// Status-to-taxonomy mapping; field errors upgrade a 4xx to [`ErrorCode::ValidationError`].
pub fn classify(status: u16, has_field_errors: bool) -> ErrorCode {
	match status {
		401 => ErrorCode::Unauthorized,
		403 => ErrorCode::Forbidden,
		404 => ErrorCode::NotFound,
		409 => ErrorCode::Conflict,
		422 => ErrorCode::ValidationError,
		429 => ErrorCode::RateLimited,
		400..=499 if has_field_errors => ErrorCode::ValidationError,
		500 | 502 | 503 | 504 => ErrorCode::ServerError,
		400..=499 => ErrorCode::BadRequest,
		_ => ErrorCode::Unknown,
	}
}

type MessageExtractor = fn(&FailurePayload, Option<&FieldError>) -> Option<String>;

const MESSAGE_EXTRACTORS: [MessageExtractor; 3] = [
	|payload, _| payload.message.clone(),
	|payload, _| payload.detail.clone(),
	|_, field_error| field_error.map(|error| error.message.clone()),
];

/// First field/message pair found in a failure payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
	/// Offending field; `None` for `non_field_errors`.
	pub field: Option<String>,
	/// Message attached to the field.
	pub message: String,
}

/// Typed view of the payload shape markers the normalizer understands.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FailurePayload {
	/// `message` field.
	pub message: Option<String>,
	/// `detail` field.
	pub detail: Option<String>,
	/// `errors` field.
	pub errors: Option<FieldErrors>,
	/// `non_field_errors` field.
	pub non_field_errors: Vec<String>,
	/// `retry_after` / `retry-after` field.
	pub retry_after: Option<Duration>,
	/// Remaining top-level members that look like `{"field": ["message", ...]}`.
	pub bare_fields: BTreeMap<String, Vec<String>>,
}
impl FailurePayload {
	/// Decodes a body; non-JSON or non-object bodies yield an empty payload.
	pub fn parse(body: &[u8]) -> Self {
		match serde_json::from_slice::<RawPayload>(body) {
			Ok(raw) => raw.into(),
			Err(_) => Self::default(),
		}
	}

	/// First field error in precedence order: `errors`, `non_field_errors`, then bare field
	/// maps (only for 400 responses).
	pub fn first_field_error(&self, status: u16) -> Option<FieldError> {
		self.errors
			.as_ref()
			.and_then(FieldErrors::first)
			.or_else(|| {
				self.non_field_errors
					.first()
					.map(|message| FieldError { field: None, message: message.clone() })
			})
			.or_else(|| {
				if status != 400 || self.message.is_some() || self.detail.is_some() {
					return None;
				}

				self.bare_fields.iter().find_map(|(field, messages)| {
					messages
						.first()
						.map(|message| FieldError { field: Some(field.clone()), message: message.clone() })
				})
			})
	}
}

/// Accepted shapes of the `errors` member.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldErrors {
	/// `{"email": ["invalid"]}` or `{"email": "invalid"}`.
	Map(BTreeMap<String, FieldMessages>),
	/// `[{"field": "email", "message": "invalid"}]`.
	List(Vec<FieldErrorEntry>),
	/// `["something went wrong"]`.
	Messages(Vec<String>),
}
impl FieldErrors {
	fn first(&self) -> Option<FieldError> {
		match self {
			FieldErrors::Map(map) => map.iter().find_map(|(field, messages)| {
				messages.first().map(|message| FieldError { field: Some(field.clone()), message })
			}),
			FieldErrors::List(entries) => entries.iter().find_map(|entry| {
				entry.message.clone().map(|message| FieldError { field: entry.field.clone(), message })
			}),
			FieldErrors::Messages(messages) =>
				messages.first().map(|message| FieldError { field: None, message: message.clone() }),
		}
	}
}

/// Messages attached to one field.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldMessages {
	/// Single message.
	One(String),
	/// Message list.
	Many(Vec<String>),
}
impl FieldMessages {
	fn first(&self) -> Option<String> {
		match self {
			FieldMessages::One(message) => Some(message.clone()),
			FieldMessages::Many(messages) => messages.first().cloned(),
		}
	}
}

/// One entry of a list-shaped `errors` member.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct FieldErrorEntry {
	/// Offending field.
	#[serde(default)]
	pub field: Option<String>,
	/// Message for the field.
	#[serde(default, alias = "detail")]
	pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
	#[serde(default)]
	message: Option<Value>,
	#[serde(default)]
	detail: Option<Value>,
	#[serde(default)]
	errors: Option<Value>,
	#[serde(default)]
	non_field_errors: Option<Value>,
	#[serde(default, alias = "retry-after")]
	retry_after: Option<Value>,
	#[serde(flatten)]
	rest: BTreeMap<String, Value>,
}
impl From<RawPayload> for FailurePayload {
	fn from(raw: RawPayload) -> Self {
		let bare_fields = raw
			.rest
			.into_iter()
			.filter_map(|(field, value)| string_list(&value).map(|messages| (field, messages)))
			.collect();

		Self {
			message: raw.message.as_ref().and_then(text),
			detail: raw.detail.as_ref().and_then(text),
			errors: raw.errors.and_then(|value| serde_json::from_value(value).ok()),
			non_field_errors: match raw
				.non_field_errors
				.and_then(|value| serde_json::from_value::<FieldMessages>(value).ok())
			{
				Some(FieldMessages::One(message)) => vec![message],
				Some(FieldMessages::Many(messages)) => messages,
				None => Vec::new(),
			},
			retry_after: raw.retry_after.as_ref().and_then(seconds),
			bare_fields,
		}
	}
}

fn text(value: &Value) -> Option<String> {
	match value {
		Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
		Value::Array(items) => items.iter().find_map(text),
		_ => None,
	}
}

fn string_list(value: &Value) -> Option<Vec<String>> {
	let items = value.as_array()?;

	items.iter().map(|item| item.as_str().map(str::to_owned)).collect::<Option<Vec<_>>>()
}

fn seconds(value: &Value) -> Option<Duration> {
	match value {
		Value::Number(number) => number.as_f64().and_then(http::seconds_f64),
		Value::String(raw) => http::parse_retry_after(raw),
		_ => None,
	}
}
