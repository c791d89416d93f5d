//! Shared fixtures for coordinator integration tests.

#![allow(dead_code)]

// std
use std::{
	collections::VecDeque,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;
// self
use resilient_api_client::{
	AppError, ErrorCode,
	auth::{AuthFuture, AuthProvider, TokenSecret},
	http::{ApiTransport, HttpRequest, TransportFailure, TransportFuture},
	request::ApiResponse,
};

pub type Reply = Result<ApiResponse, TransportFailure>;

type Responder = Box<dyn Fn(&HttpRequest) -> Reply + Send + Sync>;

/// In-process transport replaying scripted replies, then falling back to a responder.
pub struct ScriptedTransport {
	script: Mutex<VecDeque<Reply>>,
	responder: Responder,
	latency: Duration,
	log: Mutex<Vec<(Instant, HttpRequest)>>,
}
impl ScriptedTransport {
	pub fn new() -> Self {
		Self::responding(|_| Ok(ok_body()))
	}

	pub fn responding<F>(responder: F) -> Self
	where
		F: 'static + Fn(&HttpRequest) -> Reply + Send + Sync,
	{
		Self {
			script: Mutex::new(VecDeque::new()),
			responder: Box::new(responder),
			latency: Duration::ZERO,
			log: Mutex::new(Vec::new()),
		}
	}

	pub fn with_latency(mut self, latency: Duration) -> Self {
		self.latency = latency;

		self
	}

	pub fn then(self, reply: Reply) -> Self {
		self.script.lock().push_back(reply);

		self
	}

	pub fn then_status(self, status: u16) -> Self {
		self.then(Ok(ApiResponse::new(status)))
	}

	pub fn calls(&self) -> usize {
		self.log.lock().len()
	}

	pub fn requests(&self) -> Vec<HttpRequest> {
		self.log.lock().iter().map(|(_, request)| request.clone()).collect()
	}

	/// Offsets of each dispatch relative to `start`.
	pub fn dispatch_offsets(&self, start: Instant) -> Vec<Duration> {
		self.log.lock().iter().map(|(at, _)| at.saturating_duration_since(start)).collect()
	}
}
impl ApiTransport for ScriptedTransport {
	fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
		let reply = self.script.lock().pop_front().unwrap_or_else(|| (self.responder)(&request));

		self.log.lock().push((Instant::now(), request));

		let latency = self.latency;

		Box::pin(async move {
			if !latency.is_zero() {
				tokio::time::sleep(latency).await;
			}

			reply
		})
	}
}

pub fn ok_body() -> ApiResponse {
	ApiResponse::json(200, &json!({ "ok": true }))
}

/// Replies 200 only to requests carrying `Bearer <token>`, 401 otherwise.
pub fn requires_token(token: &'static str) -> impl Fn(&HttpRequest) -> Reply + Send + Sync {
	move |request| {
		let expected = format!("Bearer {token}");

		if request.header("authorization") == Some(expected.as_str()) {
			Ok(ok_body())
		} else {
			Ok(ApiResponse::json(401, &json!({ "detail": "Given token not valid" })))
		}
	}
}

/// Auth provider that rotates to a fixed token after a delay, or fails.
pub struct TestAuth {
	token: Mutex<Option<String>>,
	next: String,
	identity: Option<String>,
	latency: Duration,
	fail: bool,
	pub refreshes: AtomicUsize,
	pub clears: AtomicUsize,
}
impl TestAuth {
	pub fn new(current: &str, next: &str) -> Self {
		Self {
			token: Mutex::new(Some(current.to_owned())),
			next: next.to_owned(),
			identity: None,
			latency: Duration::from_millis(50),
			fail: false,
			refreshes: AtomicUsize::new(0),
			clears: AtomicUsize::new(0),
		}
	}

	pub fn failing(current: &str) -> Self {
		Self { fail: true, ..Self::new(current, "unused") }
	}

	pub fn with_identity(mut self, identity: &str) -> Self {
		self.identity = Some(identity.to_owned());

		self
	}

	pub fn refreshes(&self) -> usize {
		self.refreshes.load(Ordering::SeqCst)
	}

	pub fn clears(&self) -> usize {
		self.clears.load(Ordering::SeqCst)
	}
}
impl AuthProvider for TestAuth {
	fn access_token(&self) -> Option<TokenSecret> {
		self.token.lock().clone().map(TokenSecret::new)
	}

	fn refresh_access_token(&self) -> AuthFuture<'_, ()> {
		self.refreshes.fetch_add(1, Ordering::SeqCst);

		Box::pin(async move {
			tokio::time::sleep(self.latency).await;

			if self.fail {
				return Err(AppError::new(ErrorCode::Unauthorized, "Token is blacklisted."));
			}

			*self.token.lock() = Some(self.next.clone());

			Ok(())
		})
	}

	fn clear_credentials(&self) {
		self.clears.fetch_add(1, Ordering::SeqCst);
		*self.token.lock() = None;
	}

	fn identity(&self) -> Option<String> {
		self.identity.clone()
	}
}

/// Counts redirect-to-login side effects.
pub fn redirect_counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
	let count = Arc::new(AtomicUsize::new(0));
	let hook = count.clone();

	(count, move || {
		hook.fetch_add(1, Ordering::SeqCst);
	})
}
