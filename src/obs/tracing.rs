// self
use crate::{_prelude::*, request::Method};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedCall<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedCall<F> = F;

/// A span wrapping one coordinated call.
#[derive(Clone, Debug)]
pub struct CallSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl CallSpan {
	/// Creates a new span tagged with the method + endpoint label.
	pub fn new(method: Method, endpoint: &str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"resilient_api_client.call",
				method = method.as_str(),
				endpoint
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (method, endpoint);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedCall<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

pub(crate) fn dispatching(method: Method, path: &str, retry_count: u32, elapsed: Duration) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(method = method.as_str(), path, retry_count, ?elapsed, "dispatching request");
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = (method, path, retry_count, elapsed);
	}
}

pub(crate) fn retry_scheduled(code: ErrorCode, retry_count: u32, delay: Duration) {
	#[cfg(feature = "tracing")]
	{
		tracing::info!(code = code.as_str(), retry_count, ?delay, "retry scheduled");
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = (code, retry_count, delay);
	}
}

pub(crate) fn throttled(key: &str, wait: Duration) {
	#[cfg(feature = "tracing")]
	{
		tracing::info!(key, ?wait, "local rate limit reached; delaying dispatch");
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = (key, wait);
	}
}

pub(crate) fn throttle_overrun(key: &str, retry_after: Duration) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(key, ?retry_after, "rate window still exhausted after capped wait; dispatching anyway");
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = (key, retry_after);
	}
}

pub(crate) fn deduplicated(key: &str, subscribers: usize) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(key, subscribers, "attached to in-flight call");
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = (key, subscribers);
	}
}

pub(crate) fn settled(code: Option<ErrorCode>) {
	#[cfg(feature = "tracing")]
	{
		match code {
			Some(code) => tracing::warn!(code = code.as_str(), "call failed"),
			None => tracing::debug!("call succeeded"),
		}
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = code;
	}
}

pub(crate) fn refresh_settled(generation: u64, waiters: usize, ok: bool) {
	#[cfg(feature = "tracing")]
	{
		if ok {
			tracing::info!(generation, waiters, "credential refresh succeeded");
		} else {
			tracing::warn!(generation, waiters, "credential refresh failed");
		}
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = (generation, waiters, ok);
	}
}

pub(crate) fn refresh_abandoned(generation: u64) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(generation, "refresh leader dropped, waiter re-entering");
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = generation;
	}
}

pub(crate) fn subscriber_panicked(code: ErrorCode) {
	#[cfg(feature = "tracing")]
	{
		tracing::error!(code = code.as_str(), "notification subscriber panicked");
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = code;
	}
}
