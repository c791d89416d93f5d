//! Process-local publish/subscribe channel for terminal errors.

// std
use std::{
	panic::{self, AssertUnwindSafe},
	sync::{
		Weak,
		atomic::{AtomicU64, Ordering},
	},
};
// self
use crate::{_prelude::*, obs};

type Callback = Arc<dyn Fn(&AppError) + Send + Sync>;

#[derive(Default)]
struct Registry {
	next_id: AtomicU64,
	subscribers: RwLock<Vec<(u64, Callback)>>,
}

/// Broadcasts normalized errors to interested observers (e.g. a toast layer).
///
/// Subscribers are invoked in subscription order. A panicking subscriber is isolated: the
/// remaining subscribers still run and the publisher never observes the panic. Events are not
/// persisted, so late subscribers miss earlier events.
#[derive(Clone, Default)]
pub struct NotificationBus(Arc<Registry>);
impl NotificationBus {
	/// Registers `callback` and returns the handle that removes it again.
	///
	/// Dropping the handle keeps the subscriber registered; call
	/// [`Subscription::unsubscribe`] to remove it.
	pub fn subscribe<F>(&self, callback: F) -> Subscription
	where
		F: 'static + Fn(&AppError) + Send + Sync,
	{
		let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);

		self.0.subscribers.write().push((id, Arc::new(callback)));

		Subscription { id, registry: Arc::downgrade(&self.0) }
	}

	/// Invokes every current subscriber with `error`; returns how many completed normally.
	pub fn publish(&self, error: &AppError) -> usize {
		// Snapshot so subscribers may (un)subscribe re-entrantly without deadlocking.
		let subscribers =
			self.0.subscribers.read().iter().map(|(_, callback)| callback.clone()).collect::<Vec<_>>();
		let mut delivered = 0;

		for callback in subscribers {
			match panic::catch_unwind(AssertUnwindSafe(|| callback(error))) {
				Ok(()) => delivered += 1,
				Err(_) => obs::subscriber_panicked(error.code),
			}
		}

		delivered
	}

	/// Number of registered subscribers.
	pub fn subscriber_count(&self) -> usize {
		self.0.subscribers.read().len()
	}
}
impl Debug for NotificationBus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("NotificationBus").field("subscribers", &self.subscriber_count()).finish()
	}
}

/// Handle returned by [`NotificationBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
	id: u64,
	registry: Weak<Registry>,
}
impl Subscription {
	/// Removes the subscriber; returns `false` if it was already gone.
	pub fn unsubscribe(self) -> bool {
		let Some(registry) = self.registry.upgrade() else {
			return false;
		};
		let mut subscribers = registry.subscribers.write();
		let before = subscribers.len();

		subscribers.retain(|(id, _)| *id != self.id);

		subscribers.len() != before
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn publish_reaches_subscribers_in_order() {
		let bus = NotificationBus::default();
		let seen = Arc::new(Mutex::new(Vec::new()));
		let first = seen.clone();
		let second = seen.clone();

		bus.subscribe(move |err| first.lock().push(format!("first:{}", err.code)));
		bus.subscribe(move |err| second.lock().push(format!("second:{}", err.code)));

		assert_eq!(bus.publish(&AppError::from_code(ErrorCode::NotFound)), 2);
		assert_eq!(*seen.lock(), vec!["first:not_found", "second:not_found"]);
	}

	#[test]
	fn panicking_subscriber_does_not_affect_others() {
		let bus = NotificationBus::default();
		let seen = Arc::new(Mutex::new(0));
		let counter = seen.clone();

		bus.subscribe(|_| panic!("toast layer crashed"));
		bus.subscribe(move |_| *counter.lock() += 1);

		assert_eq!(bus.publish(&AppError::from_code(ErrorCode::ServerError)), 1);
		assert_eq!(*seen.lock(), 1);
	}

	#[test]
	fn unsubscribe_stops_delivery_and_late_subscribers_miss_events() {
		let bus = NotificationBus::default();
		let seen = Arc::new(Mutex::new(0));
		let counter = seen.clone();
		let subscription = bus.subscribe(move |_| *counter.lock() += 1);

		bus.publish(&AppError::from_code(ErrorCode::Conflict));

		assert!(subscription.unsubscribe());
		assert_eq!(bus.publish(&AppError::from_code(ErrorCode::Conflict)), 0);
		assert_eq!(*seen.lock(), 1);

		let late = Arc::new(Mutex::new(0));
		let late_counter = late.clone();

		bus.subscribe(move |_| *late_counter.lock() += 1);

		assert_eq!(*late.lock(), 0);
		assert_eq!(bus.subscriber_count(), 1);
	}
}
