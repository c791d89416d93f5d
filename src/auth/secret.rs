//! Access and refresh tokens as held by credential providers.

// self
use crate::_prelude::*;

/// Access or refresh token handed between an [`AuthProvider`](crate::auth::AuthProvider) and
/// the coordinator.
///
/// `Debug` and `Display` print `<redacted>`, so tokens can sit inside request diagnostics and
/// tracing fields without leaking.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a token issued by the backend.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Raw token, for request bodies such as `{"refresh": ..}`; never log it.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// `Authorization` header value the coordinator injects for this token.
	pub fn bearer(&self) -> String {
		format!("Bearer {}", self.0)
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}
