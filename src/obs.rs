//! Optional observability helpers for coordinated calls.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `resilient_api_client.call` with the
//!   `method` and `endpoint` fields, plus events for dispatches, retries, throttling waits,
//!   deduplicated attachments, refresh cycles, and panicking subscribers.
//! - Enable `metrics` to increment the `resilient_api_client_call_total` counter labeled by
//!   `method` + `outcome`, and `resilient_api_client_refresh_total` labeled by `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Outcome labels recorded for calls and refresh cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallOutcome {
	/// Transport dispatch.
	Attempt,
	/// Successful completion.
	Success,
	/// Terminal failure propagated back to the caller.
	Failure,
	/// A retry was scheduled.
	Retry,
	/// The caller attached to an identical in-flight call.
	Deduplicated,
	/// The local limiter delayed the call.
	Throttled,
}
impl CallOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallOutcome::Attempt => "attempt",
			CallOutcome::Success => "success",
			CallOutcome::Failure => "failure",
			CallOutcome::Retry => "retry",
			CallOutcome::Deduplicated => "deduplicated",
			CallOutcome::Throttled => "throttled",
		}
	}
}
impl Display for CallOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
