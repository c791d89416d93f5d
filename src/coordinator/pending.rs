//! In-flight call table backing request deduplication.
//!
//! Each entry holds a weak handle to a shared call future. Callers hold the strong handles,
//! so the call lives exactly as long as somebody awaits it; the entry is removed when the
//! call settles or when its last caller goes away.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
// self
use crate::{_prelude::*, request::ApiResponse};

/// Shared outcome every caller of one deduplicated call awaits.
pub(crate) type CallFuture = Shared<BoxFuture<'static, Result<ApiResponse>>>;

struct PendingCall {
	id: u64,
	outcome: WeakShared<BoxFuture<'static, Result<ApiResponse>>>,
	subscribers: usize,
}

/// How a caller got hold of its [`CallFuture`].
pub(crate) enum Joined {
	/// The caller started a new call.
	Started(CallFuture),
	/// The caller attached to an identical call; carries the subscriber count after joining.
	Attached(CallFuture, usize),
}

#[derive(Default)]
pub(crate) struct PendingTable {
	next_id: AtomicU64,
	calls: Mutex<HashMap<String, PendingCall>>,
}
impl PendingTable {
	/// Attaches to the live call for `key`, or starts one from `start`.
	pub(crate) fn join_or_start<F>(self: &Arc<Self>, key: String, start: F) -> Joined
	where
		F: FnOnce() -> BoxFuture<'static, Result<ApiResponse>>,
	{
		let mut calls = self.calls.lock();

		if let Some(call) = calls.get_mut(&key) {
			// A dead weak handle means the last caller left; its guard is about to remove it.
			if let Some(outcome) = call.outcome.upgrade() {
				call.subscribers += 1;

				return Joined::Attached(outcome, call.subscribers);
			}
		}

		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let guard = PendingGuard { table: self.clone(), key: key.clone(), id };
		let call = start();
		let outcome = async move {
			let _guard = guard;

			call.await
		}
		.boxed()
		.shared();
		let weak = outcome.downgrade().map(|weak| PendingCall { id, outcome: weak, subscribers: 1 });

		if let Some(entry) = weak {
			calls.insert(key, entry);
		}

		Joined::Started(outcome)
	}

	/// Number of calls currently in flight.
	pub(crate) fn len(&self) -> usize {
		self.calls.lock().len()
	}

	fn remove(&self, key: &str, id: u64) {
		let mut calls = self.calls.lock();

		if calls.get(key).is_some_and(|call| call.id == id) {
			calls.remove(key);
		}
	}
}

/// Removes its entry when the owning call settles or is dropped.
struct PendingGuard {
	table: Arc<PendingTable>,
	key: String,
	id: u64,
}
impl Drop for PendingGuard {
	fn drop(&mut self) {
		self.table.remove(&self.key, self.id);
	}
}
