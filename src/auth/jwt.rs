//! [`AuthProvider`] for backends issuing JWT access/refresh pairs.

// crates.io
use serde_json::json;
// self
use crate::{
	_prelude::*,
	auth::{AuthFuture, AuthProvider, MemoryCredentials, TokenSecret},
	http::{ApiTransport, HttpRequest},
	normalize::{ErrorNormalizer, RawFailure},
	request::Method,
};

#[derive(Debug, Deserialize)]
struct RefreshReply {
	access: String,
	#[serde(default)]
	refresh: Option<String>,
}

/// Refreshes by posting `{"refresh": <token>}` to a refresh endpoint.
///
/// The exchange goes straight through the raw [`ApiTransport`], never through the
/// coordinator, so a 401 from the refresh endpoint is a hard failure instead of another
/// refresh cycle. The reply must carry `access` and may carry a rotated `refresh`.
pub struct JwtRefreshProvider<T>
where
	T: ?Sized + ApiTransport,
{
	transport: Arc<T>,
	credentials: MemoryCredentials,
	refresh_path: String,
	timeout: Duration,
	normalizer: ErrorNormalizer,
}
impl<T> JwtRefreshProvider<T>
where
	T: ?Sized + ApiTransport,
{
	/// Creates a provider bound to `refresh_path` on `transport`.
	pub fn new(
		transport: Arc<T>,
		credentials: MemoryCredentials,
		refresh_path: impl Into<String>,
	) -> Self {
		Self {
			transport,
			credentials,
			refresh_path: refresh_path.into(),
			timeout: Duration::from_secs(30),
			normalizer: ErrorNormalizer::default(),
		}
	}

	/// Overrides the refresh call timeout (defaults to 30 seconds).
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Credential holder this provider reads and rotates.
	pub fn credentials(&self) -> &MemoryCredentials {
		&self.credentials
	}

	async fn exchange(&self) -> Result<()> {
		let refresh = self.credentials.refresh().ok_or_else(|| {
			AppError::new(ErrorCode::Unauthorized, "No refresh token is available.")
		})?;
		let request = HttpRequest {
			method: Method::Post,
			path: self.refresh_path.clone(),
			query: Vec::new(),
			headers: vec![("content-type".into(), "application/json".into())],
			body: Some(json!({ "refresh": refresh.expose() })),
			timeout: self.timeout,
		};
		let response = self
			.transport
			.send(request)
			.await
			.map_err(|failure| self.normalizer.normalize(&RawFailure::NoResponse(failure)))?;

		if !response.is_success() {
			let error = self.normalizer.normalize(&RawFailure::Status(response));

			return Err(AppError { code: ErrorCode::Unauthorized, ..error });
		}

		let reply = response.decode::<RefreshReply>().map_err(|err| {
			AppError::new(
				ErrorCode::Unauthorized,
				format!("The refresh reply is malformed at `{}`.", err.path()),
			)
			.with_http_status(response.status)
		})?;

		self.credentials.store(reply.access, reply.refresh);

		Ok(())
	}
}
impl<T> AuthProvider for JwtRefreshProvider<T>
where
	T: ?Sized + ApiTransport,
{
	fn access_token(&self) -> Option<TokenSecret> {
		self.credentials.access()
	}

	fn refresh_access_token(&self) -> AuthFuture<'_, ()> {
		Box::pin(self.exchange())
	}

	fn clear_credentials(&self) {
		self.credentials.clear();
	}

	fn identity(&self) -> Option<String> {
		self.credentials.identity()
	}
}
impl<T> Debug for JwtRefreshProvider<T>
where
	T: ?Sized + ApiTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("JwtRefreshProvider")
			.field("refresh_path", &self.refresh_path)
			.field("timeout", &self.timeout)
			.field("signed_in", &self.credentials.is_signed_in())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::Value;
	// self
	use super::*;
	use crate::{
		http::{TransportFailure, TransportFuture},
		request::ApiResponse,
	};

	struct StubTransport {
		reply: std::result::Result<ApiResponse, TransportFailure>,
		seen: Mutex<Vec<HttpRequest>>,
	}
	impl ApiTransport for StubTransport {
		fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
			self.seen.lock().push(request);

			let reply = self.reply.clone();

			Box::pin(async move { reply })
		}
	}

	fn stub_provider(
		reply: std::result::Result<ApiResponse, TransportFailure>,
	) -> (Arc<StubTransport>, JwtRefreshProvider<StubTransport>) {
		let transport = Arc::new(StubTransport { reply, seen: Mutex::new(Vec::new()) });
		let credentials = MemoryCredentials::new("stale", "refresh-1");

		(transport.clone(), JwtRefreshProvider::new(transport, credentials, "/api/auth/refresh"))
	}

	#[tokio::test]
	async fn refresh_stores_rotated_pair() {
		let reply = ApiResponse::json(200, &json!({ "access": "fresh", "refresh": "refresh-2" }));
		let (transport, provider) = stub_provider(Ok(reply));

		provider.refresh_access_token().await.expect("Refresh should succeed.");

		assert_eq!(provider.access_token().map(|s| s.expose().to_owned()), Some("fresh".into()));
		assert_eq!(
			provider.credentials().refresh().map(|s| s.expose().to_owned()),
			Some("refresh-2".into())
		);

		let seen = transport.seen.lock();

		assert_eq!(seen.len(), 1);
		assert_eq!(seen[0].method, Method::Post);
		assert_eq!(seen[0].path, "/api/auth/refresh");
		assert_eq!(seen[0].body, Some(json!({ "refresh": "refresh-1" })));
		assert!(seen[0].header("authorization").is_none());
	}

	#[tokio::test]
	async fn rejected_refresh_is_unauthorized() {
		let reply = ApiResponse::json(401, &json!({ "detail": "Token is blacklisted" }));
		let (_, provider) = stub_provider(Ok(reply));
		let err = provider.refresh_access_token().await.expect_err("Refresh should fail.");

		assert_eq!(err.code, ErrorCode::Unauthorized);
		assert_eq!(err.message, "Token is blacklisted");
		assert_eq!(provider.access_token().map(|s| s.expose().to_owned()), Some("stale".into()));
	}

	#[tokio::test]
	async fn malformed_or_missing_inputs_are_unauthorized() {
		let reply = ApiResponse::json(200, &json!({ "token": "x" }));
		let (_, provider) = stub_provider(Ok(reply));
		let err = provider.refresh_access_token().await.expect_err("Malformed reply should fail.");

		assert_eq!(err.code, ErrorCode::Unauthorized);
		assert!(err.message.contains("malformed"));

		let (transport, provider) = stub_provider(Ok(ApiResponse::json(200, &Value::Null)));

		provider.clear_credentials();

		let err = provider.refresh_access_token().await.expect_err("Missing token should fail.");

		assert_eq!(err.code, ErrorCode::Unauthorized);
		assert!(transport.seen.lock().is_empty());
	}

	#[tokio::test]
	async fn transport_failure_surfaces_as_network_error() {
		let (_, provider) = stub_provider(Err(TransportFailure::Connect("refused".into())));
		let err = provider.refresh_access_token().await.expect_err("Refresh should fail.");

		assert_eq!(err.code, ErrorCode::NetworkError);
	}
}
