//! Single entry point that every outgoing call goes through.
//!
//! [`RequestCoordinator::send`] runs each logical call through the same state machine:
//!
//! 1. attach to an identical in-flight call, if any;
//! 2. consult the endpoint's rate window and wait (capped) when it is exhausted;
//! 3. attach the current credential and dispatch;
//! 4. on failure, normalize and either refresh credentials once, wait out a server limit,
//!    back off, or settle.
//!
//! Every terminal error is published on the [`NotificationBus`] before it reaches the caller.

pub mod config;
pub mod retry;

mod pending;

pub use config::ClientConfig;
pub use retry::{RetryDecision, RetryPolicy};

// crates.io
use futures::FutureExt;
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{
		Anonymous, AuthProvider, LoginRedirect, NoRedirect, RefreshMetrics, TokenRefreshCoordinator,
		TokenSecret,
	},
	http::{ApiTransport, HttpRequest},
	normalize::{ErrorNormalizer, RawFailure},
	notify::{NotificationBus, Subscription},
	obs::{self, CallOutcome, CallSpan},
	policy::{EndpointPolicy, EndpointPolicyRegistry},
	rate_limit::RateLimiter,
	request::{ApiResponse, Method, RequestSpec},
};
use pending::{Joined, PendingTable};

/// Diagnostics for one logical call as it advances through retries.
#[derive(Clone, Debug)]
pub struct RequestAttempt {
	/// Endpoint label used for policy lookup.
	pub endpoint: String,
	/// Instant the first dispatch was prepared.
	pub started_at: Instant,
	/// Retries consumed from the shared budget.
	pub retry_count: u32,
	/// Whether the call already went through the refresh protocol.
	pub auth_retried: bool,
}
impl RequestAttempt {
	fn new(spec: &RequestSpec) -> Self {
		Self {
			endpoint: spec.endpoint_label(),
			started_at: Instant::now(),
			retry_count: 0,
			auth_retried: spec.skip_auth_refresh,
		}
	}

	/// Time since the first dispatch was prepared.
	pub fn elapsed(&self) -> Duration {
		self.started_at.elapsed()
	}
}

struct Core<T>
where
	T: ?Sized + ApiTransport,
{
	transport: Arc<T>,
	config: ClientConfig,
	retry: RetryPolicy,
	policies: EndpointPolicyRegistry,
	limiter: RateLimiter,
	normalizer: ErrorNormalizer,
	bus: NotificationBus,
	auth: Arc<dyn AuthProvider>,
	refresh: TokenRefreshCoordinator,
	pending: Arc<PendingTable>,
	last_cleanup: Mutex<Instant>,
}
impl<T> Core<T>
where
	T: ?Sized + ApiTransport,
{
	async fn execute(self: Arc<Self>, spec: RequestSpec) -> Result<ApiResponse> {
		let span = CallSpan::new(spec.method, &spec.endpoint_label());
		let result = span.instrument(self.run(&spec)).await;

		match &result {
			Ok(_) => {
				obs::record_call_outcome(spec.method, CallOutcome::Success);
				obs::settled(None);
			},
			Err(err) => {
				obs::record_call_outcome(spec.method, CallOutcome::Failure);
				obs::settled(Some(err.code));
				self.bus.publish(err);
			},
		}

		result
	}

	async fn run(&self, spec: &RequestSpec) -> Result<ApiResponse> {
		let mut attempt = RequestAttempt::new(spec);
		let policy = self.policies.policy_for(spec.method, &attempt.endpoint);
		let rate_key = self.rate_key(spec);

		self.throttle(spec.method, &rate_key, policy).await;

		loop {
			let (request, sent_token) = self.prepare(spec);

			obs::dispatching(spec.method, &request.path, attempt.retry_count, attempt.elapsed());
			obs::record_call_outcome(spec.method, CallOutcome::Attempt);

			let raw = match self.transport.send(request).await {
				Ok(response) if response.is_success() => return Ok(response),
				Ok(response) => RawFailure::Status(response),
				Err(failure) => RawFailure::NoResponse(failure),
			};
			let error = self.normalizer.normalize(&raw);

			if error.is(ErrorCode::RateLimited) {
				self.limiter.record_server_limit(
					&rate_key,
					error.retry_after.unwrap_or(self.config.default_retry_after),
				);
			}

			let delay = match self.retry.decide(
				spec.method,
				&error,
				attempt.retry_count,
				attempt.auth_retried,
			) {
				RetryDecision::Surface => return Err(error),
				RetryDecision::RefreshCredentials => {
					attempt.auth_retried = true;

					// Another call may have rotated the credential while this one was in flight.
					let rotated = self.auth.access_token().is_some_and(|current| {
						sent_token.as_ref().is_none_or(|sent| sent != &current)
					});

					if !rotated && self.refresh.refresh().await.is_err() {
						return Err(error);
					}

					continue;
				},
				RetryDecision::AwaitServerLimit(delay) | RetryDecision::Backoff(delay) => delay,
			};

			obs::retry_scheduled(error.code, attempt.retry_count, delay);
			obs::record_call_outcome(spec.method, CallOutcome::Retry);
			tokio::time::sleep(delay).await;

			attempt.retry_count += 1;
		}
	}

	/// Best-effort local throttle: waits once, capped, then re-checks and proceeds regardless.
	async fn throttle(&self, method: Method, key: &str, policy: &EndpointPolicy) {
		let decision = self.limiter.is_allowed(key, policy);

		if decision.allowed {
			return;
		}

		let wait = decision.retry_after.min(self.config.rate_limit_wait_cap);

		obs::throttled(key, wait);
		obs::record_call_outcome(method, CallOutcome::Throttled);
		tokio::time::sleep(wait).await;

		// An admitted re-check counts this dispatch; a rejected one is logged and ignored.
		let recheck = self.limiter.is_allowed(key, policy);

		if !recheck.allowed {
			obs::throttle_overrun(key, recheck.retry_after);
		}
	}

	fn prepare(&self, spec: &RequestSpec) -> (HttpRequest, Option<TokenSecret>) {
		let mut headers = spec.headers.clone();
		let sent_token =
			if spec.header("authorization").is_none() { self.auth.access_token() } else { None };

		if let Some(token) = &sent_token {
			headers.push(("authorization".into(), token.bearer()));
		}

		let request = HttpRequest {
			method: spec.method,
			path: spec.path.clone(),
			query: spec.query.clone(),
			headers,
			body: spec.body.clone(),
			timeout: self.config.request_timeout,
		};

		(request, sent_token)
	}

	fn rate_key(&self, spec: &RequestSpec) -> String {
		let key = spec.rate_key();

		if !self.config.per_user_limits {
			return key;
		}

		match self.auth.identity() {
			Some(identity) => format!("{key}@{identity}"),
			None => key,
		}
	}

	fn maybe_cleanup(&self) {
		let now = Instant::now();

		{
			let mut last = self.last_cleanup.lock();

			if now.saturating_duration_since(*last) < self.config.cleanup_interval {
				return;
			}

			*last = now;
		}

		self.limiter.cleanup_at(now);
	}
}

/// Dependency-injected client layer wrapping an [`ApiTransport`].
///
/// Cloning is cheap and every clone shares the same rate windows, in-flight table, refresh
/// state, and notification bus.
pub struct RequestCoordinator<T = dyn ApiTransport>
where
	T: ?Sized + ApiTransport,
{
	shared: Arc<Core<T>>,
}
impl<T> RequestCoordinator<T>
where
	T: ?Sized + ApiTransport,
{
	/// Starts a builder around `transport`.
	pub fn builder(transport: Arc<T>) -> RequestCoordinatorBuilder<T> {
		RequestCoordinatorBuilder {
			transport,
			config: ClientConfig::default(),
			policies: EndpointPolicyRegistry::default(),
			auth: Arc::new(Anonymous),
			redirect: Arc::new(NoRedirect),
			bus: NotificationBus::default(),
		}
	}

	/// Sends `spec`, returning the 2xx response or the normalized terminal error.
	///
	/// Identical concurrent calls share one dispatch and observe the identical outcome.
	pub async fn send(&self, spec: RequestSpec) -> Result<ApiResponse> {
		self.shared.maybe_cleanup();

		let method = spec.method;
		let key = spec.dedup_key();
		let shared = self.shared.clone();
		let joined = self
			.shared
			.pending
			.join_or_start(key.clone(), move || shared.execute(spec).boxed());

		match joined {
			Joined::Started(call) => call.await,
			Joined::Attached(call, subscribers) => {
				obs::deduplicated(&key, subscribers);
				obs::record_call_outcome(method, CallOutcome::Deduplicated);

				call.await
			},
		}
	}

	/// Sends `spec` and decodes the JSON body of the successful response.
	///
	/// A body that does not match `D` settles as [`ErrorCode::Unknown`] naming the failing
	/// JSON path, and is published like any other terminal error.
	pub async fn send_json<D>(&self, spec: RequestSpec) -> Result<D>
	where
		D: DeserializeOwned,
	{
		let response = self.send(spec).await?;

		response.decode().map_err(|err| {
			let error = self.shared.normalizer.normalize(&RawFailure::MalformedPayload {
				status: response.status,
				detail: format!("`{}`: {}", err.path(), err.inner()),
			});

			self.shared.bus.publish(&error);

			error
		})
	}

	/// Registers a terminal-error observer.
	pub fn subscribe<F>(&self, callback: F) -> Subscription
	where
		F: 'static + Fn(&AppError) + Send + Sync,
	{
		self.shared.bus.subscribe(callback)
	}

	/// Bus every terminal error is published on.
	pub fn notifications(&self) -> &NotificationBus {
		&self.shared.bus
	}

	/// Number of distinct calls currently in flight.
	pub fn in_flight(&self) -> usize {
		self.shared.pending.len()
	}

	/// Rate windows shared by proactive throttling and server-reported limits.
	pub fn rate_limiter(&self) -> &RateLimiter {
		&self.shared.limiter
	}

	/// Rate-limit key `spec` is counted under, including the identity suffix when enabled.
	pub fn rate_key(&self, spec: &RequestSpec) -> String {
		self.shared.rate_key(spec)
	}

	/// Policy table consulted before each call.
	pub fn policies(&self) -> &EndpointPolicyRegistry {
		&self.shared.policies
	}

	/// Active configuration.
	pub fn config(&self) -> &ClientConfig {
		&self.shared.config
	}

	/// Refresh-cycle counters.
	pub fn refresh_metrics(&self) -> Arc<RefreshMetrics> {
		self.shared.refresh.metrics()
	}
}
impl<T> Clone for RequestCoordinator<T>
where
	T: ?Sized + ApiTransport,
{
	fn clone(&self) -> Self {
		Self { shared: self.shared.clone() }
	}
}
impl<T> Debug for RequestCoordinator<T>
where
	T: ?Sized + ApiTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestCoordinator")
			.field("config", &self.shared.config)
			.field("policies", &self.shared.policies.len())
			.field("in_flight", &self.in_flight())
			.field("refresh", &self.shared.refresh)
			.finish()
	}
}

/// Builder for [`RequestCoordinator`].
pub struct RequestCoordinatorBuilder<T>
where
	T: ?Sized + ApiTransport,
{
	transport: Arc<T>,
	config: ClientConfig,
	policies: EndpointPolicyRegistry,
	auth: Arc<dyn AuthProvider>,
	redirect: Arc<dyn LoginRedirect>,
	bus: NotificationBus,
}
impl<T> RequestCoordinatorBuilder<T>
where
	T: ?Sized + ApiTransport,
{
	/// Overrides the global constants.
	pub fn with_config(mut self, config: ClientConfig) -> Self {
		self.config = config;

		self
	}

	/// Installs the endpoint policy table.
	pub fn with_policies(mut self, policies: EndpointPolicyRegistry) -> Self {
		self.policies = policies;

		self
	}

	/// Installs the credential source (defaults to anonymous calls).
	pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
		self.auth = auth;

		self
	}

	/// Installs the side effect fired when a refresh cycle fails.
	pub fn with_login_redirect(mut self, redirect: Arc<dyn LoginRedirect>) -> Self {
		self.redirect = redirect;

		self
	}

	/// Shares an existing bus, e.g. one owned by a UI layer.
	pub fn with_notifications(mut self, bus: NotificationBus) -> Self {
		self.bus = bus;

		self
	}

	/// Finalizes the coordinator.
	pub fn build(self) -> RequestCoordinator<T> {
		let Self { transport, config, policies, auth, redirect, bus } = self;
		let shared = Core {
			transport,
			retry: RetryPolicy::from(&config),
			normalizer: ErrorNormalizer::new(config.default_retry_after),
			config,
			policies,
			limiter: RateLimiter::default(),
			bus,
			refresh: TokenRefreshCoordinator::new(auth.clone(), redirect),
			auth,
			pending: Default::default(),
			last_cleanup: Mutex::new(Instant::now()),
		};

		RequestCoordinator { shared: Arc::new(shared) }
	}
}
impl<T> Debug for RequestCoordinatorBuilder<T>
where
	T: ?Sized + ApiTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestCoordinatorBuilder")
			.field("config", &self.config)
			.field("policies", &self.policies.len())
			.finish()
	}
}
