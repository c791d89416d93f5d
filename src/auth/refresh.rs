//! Single-flight credential refresh with a FIFO waiter queue.
//!
//! [`TokenRefreshCoordinator`] is a two-state machine (`Idle`, `Refreshing`). The first
//! caller to arrive while idle becomes the leader and runs
//! [`AuthProvider::refresh_access_token`]; everyone arriving while the refresh is in flight
//! is appended to the waiter queue. When the refresh settles the queue is drained strictly
//! in enqueue order. A failed refresh clears credentials and fires the login redirect once
//! per cycle, no matter how many callers were waiting.

mod metrics;

pub use metrics::RefreshMetrics;

// crates.io
use futures::channel::oneshot;
// self
use crate::{
	_prelude::*,
	auth::{AuthProvider, LoginRedirect},
	obs::{self, CallOutcome},
};

type Waiter = oneshot::Sender<Result<()>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
	Idle,
	Refreshing,
}

#[derive(Debug)]
struct RefreshState {
	phase: Phase,
	generation: u64,
	waiters: VecDeque<Waiter>,
}
impl Default for RefreshState {
	fn default() -> Self {
		Self { phase: Phase::Idle, generation: 0, waiters: VecDeque::new() }
	}
}

/// Receipt describing how a caller took part in a refresh cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshTicket {
	/// Refresh cycle the caller joined; increments once per executed refresh.
	pub generation: u64,
	/// Queue position: `0` for the caller that ran the refresh, `1..` for waiters in order.
	pub position: usize,
}
impl RefreshTicket {
	/// Returns `true` when this caller executed the refresh itself.
	pub fn is_leader(&self) -> bool {
		self.position == 0
	}
}

/// Serializes credential refreshes across every in-flight call.
pub struct TokenRefreshCoordinator {
	auth: Arc<dyn AuthProvider>,
	redirect: Arc<dyn LoginRedirect>,
	state: Mutex<RefreshState>,
	metrics: Arc<RefreshMetrics>,
}
impl TokenRefreshCoordinator {
	/// Creates an idle coordinator.
	pub fn new(auth: Arc<dyn AuthProvider>, redirect: Arc<dyn LoginRedirect>) -> Self {
		Self {
			auth,
			redirect,
			state: Mutex::new(RefreshState::default()),
			metrics: Default::default(),
		}
	}

	/// Joins the current refresh cycle, or starts one when idle.
	///
	/// Resolves once the cycle settles. On failure every participant receives the same
	/// [`ErrorCode::Unauthorized`] error. If the leader is dropped before settling, its
	/// waiters re-enter in queue order and the first of them runs the next cycle.
	pub async fn refresh(&self) -> Result<RefreshTicket> {
		loop {
			let (ticket, waiter) = self.join();
			let Some(rx) = waiter else {
				return self.lead(ticket).await.map(|()| ticket);
			};

			self.metrics.record_joined();

			if let Ok(result) = rx.await {
				return result.map(|()| ticket);
			}

			self.metrics.record_abandoned();
			obs::refresh_abandoned(ticket.generation);
		}
	}

	/// Returns `true` while a refresh is executing.
	pub fn is_refreshing(&self) -> bool {
		self.state.lock().phase == Phase::Refreshing
	}

	/// Number of callers queued behind the executing refresh.
	pub fn waiting(&self) -> usize {
		self.state.lock().waiters.len()
	}

	/// Shared refresh counters.
	pub fn metrics(&self) -> Arc<RefreshMetrics> {
		self.metrics.clone()
	}

	fn join(&self) -> (RefreshTicket, Option<oneshot::Receiver<Result<()>>>) {
		let mut state = self.state.lock();

		match state.phase {
			Phase::Refreshing => {
				let (tx, rx) = oneshot::channel();

				state.waiters.push_back(tx);

				(RefreshTicket { generation: state.generation, position: state.waiters.len() }, Some(rx))
			},
			Phase::Idle => {
				state.phase = Phase::Refreshing;
				state.generation += 1;

				(RefreshTicket { generation: state.generation, position: 0 }, None)
			},
		}
	}

	async fn lead(&self, ticket: RefreshTicket) -> Result<()> {
		self.metrics.record_attempt();
		obs::record_refresh_outcome(CallOutcome::Attempt);

		let guard = LeaderGuard { state: &self.state, armed: true };
		let result = self
			.auth
			.refresh_access_token()
			.await
			.map_err(|err| AppError { code: ErrorCode::Unauthorized, ..err });
		let waiters = guard.settle();

		match &result {
			Ok(()) => {
				self.metrics.record_success();
				obs::record_refresh_outcome(CallOutcome::Success);
			},
			Err(_) => {
				self.metrics.record_failure();
				obs::record_refresh_outcome(CallOutcome::Failure);
				self.auth.clear_credentials();
				self.redirect.redirect_to_login();
			},
		}

		obs::refresh_settled(ticket.generation, waiters.len(), result.is_ok());

		for waiter in waiters {
			// A waiter whose call was dropped has nobody left to notify.
			let _ = waiter.send(result.clone());
		}

		result
	}
}
impl Debug for TokenRefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let state = self.state.lock();

		f.debug_struct("TokenRefreshCoordinator")
			.field("phase", &state.phase)
			.field("generation", &state.generation)
			.field("waiting", &state.waiters.len())
			.finish()
	}
}

/// Returns the coordinator to `Idle` if the leader is dropped mid-refresh; queued waiters
/// then observe a closed channel and re-enter [`TokenRefreshCoordinator::refresh`].
struct LeaderGuard<'a> {
	state: &'a Mutex<RefreshState>,
	armed: bool,
}
impl LeaderGuard<'_> {
	fn settle(mut self) -> VecDeque<Waiter> {
		self.armed = false;

		let mut state = self.state.lock();

		state.phase = Phase::Idle;

		std::mem::take(&mut state.waiters)
	}
}
impl Drop for LeaderGuard<'_> {
	fn drop(&mut self) {
		if self.armed {
			let mut state = self.state.lock();

			state.phase = Phase::Idle;
			state.waiters.clear();
		}
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// crates.io
	use tokio::sync::Notify;
	// self
	use super::*;
	use crate::auth::{AuthFuture, TokenSecret};

	#[derive(Default)]
	struct GatedAuth {
		gate: Notify,
		refreshes: AtomicUsize,
		clears: AtomicUsize,
		fail: bool,
	}
	impl AuthProvider for GatedAuth {
		fn access_token(&self) -> Option<TokenSecret> {
			None
		}

		fn refresh_access_token(&self) -> AuthFuture<'_, ()> {
			self.refreshes.fetch_add(1, Ordering::SeqCst);

			Box::pin(async move {
				self.gate.notified().await;

				if self.fail {
					Err(AppError::new(ErrorCode::BadRequest, "Refresh token expired."))
				} else {
					Ok(())
				}
			})
		}

		fn clear_credentials(&self) {
			self.clears.fetch_add(1, Ordering::SeqCst);
		}

		fn identity(&self) -> Option<String> {
			None
		}
	}

	fn coordinator(
		auth: Arc<GatedAuth>,
		redirects: Arc<AtomicUsize>,
	) -> Arc<TokenRefreshCoordinator> {
		Arc::new(TokenRefreshCoordinator::new(
			auth,
			Arc::new(move || {
				redirects.fetch_add(1, Ordering::SeqCst);
			}),
		))
	}

	#[tokio::test]
	async fn concurrent_callers_share_one_refresh_in_fifo_order() {
		let auth = Arc::new(GatedAuth::default());
		let refresh = coordinator(auth.clone(), Default::default());
		let order = Arc::new(Mutex::new(Vec::new()));
		let mut handles = Vec::new();

		for caller in 0..3 {
			let refresh = refresh.clone();
			let order = order.clone();

			handles.push(tokio::spawn(async move {
				let ticket = refresh.refresh().await.expect("Refresh should succeed.");

				order.lock().push((caller, ticket.position));

				ticket
			}));

			// Let each caller reach the coordinator before the next one starts.
			tokio::task::yield_now().await;
		}

		assert!(refresh.is_refreshing());
		assert_eq!(refresh.waiting(), 2);

		auth.gate.notify_one();

		let mut tickets = Vec::new();

		for handle in handles {
			tickets.push(handle.await.expect("Task should not panic."));
		}

		assert_eq!(auth.refreshes.load(Ordering::SeqCst), 1);
		assert!(tickets.iter().all(|ticket| ticket.generation == 1));
		assert_eq!(
			tickets.iter().map(|ticket| ticket.position).collect::<Vec<_>>(),
			vec![0, 1, 2]
		);
		assert_eq!(*order.lock(), vec![(0, 0), (1, 1), (2, 2)]);
		assert!(!refresh.is_refreshing());
		assert_eq!(refresh.metrics().attempts(), 1);
		assert_eq!(refresh.metrics().joined(), 2);
	}

	#[tokio::test]
	async fn failed_refresh_clears_and_redirects_once() {
		let auth = Arc::new(GatedAuth { fail: true, ..Default::default() });
		let redirects = Arc::new(AtomicUsize::new(0));
		let refresh = coordinator(auth.clone(), redirects.clone());
		let leader = tokio::spawn({
			let refresh = refresh.clone();

			async move { refresh.refresh().await }
		});

		tokio::task::yield_now().await;

		let waiter = tokio::spawn({
			let refresh = refresh.clone();

			async move { refresh.refresh().await }
		});

		tokio::task::yield_now().await;
		auth.gate.notify_one();

		for handle in [leader, waiter] {
			let err = handle
				.await
				.expect("Task should not panic.")
				.expect_err("Refresh should fail for every participant.");

			assert_eq!(err.code, ErrorCode::Unauthorized);
			assert_eq!(err.message, "Refresh token expired.");
		}

		assert_eq!(auth.refreshes.load(Ordering::SeqCst), 1);
		assert_eq!(auth.clears.load(Ordering::SeqCst), 1);
		assert_eq!(redirects.load(Ordering::SeqCst), 1);
		assert_eq!(refresh.metrics().failures(), 1);
	}

	#[tokio::test]
	async fn dropped_leader_hands_the_refresh_to_the_next_waiter() {
		let auth = Arc::new(GatedAuth::default());
		let redirects = Arc::new(AtomicUsize::new(0));
		let refresh = coordinator(auth.clone(), redirects.clone());
		let leader = tokio::spawn({
			let refresh = refresh.clone();

			async move { refresh.refresh().await }
		});

		tokio::task::yield_now().await;

		let waiter = tokio::spawn({
			let refresh = refresh.clone();

			async move { refresh.refresh().await }
		});

		tokio::task::yield_now().await;

		assert_eq!(refresh.waiting(), 1);

		leader.abort();

		assert!(leader.await.is_err_and(|err| err.is_cancelled()));

		auth.gate.notify_one();

		let ticket = waiter
			.await
			.expect("Task should not panic.")
			.expect("Waiter should complete the refresh itself.");

		assert_eq!(ticket.generation, 2);
		assert!(ticket.is_leader());
		assert_eq!(auth.refreshes.load(Ordering::SeqCst), 2);
		assert_eq!(auth.clears.load(Ordering::SeqCst), 0);
		assert_eq!(redirects.load(Ordering::SeqCst), 0);
		assert!(!refresh.is_refreshing());
		assert_eq!(refresh.metrics().successes(), 1);
		assert_eq!(refresh.metrics().abandoned(), 1);
	}
}
