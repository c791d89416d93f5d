//! Credential collaborators and the single-flight refresh protocol.
//!
//! The coordinator never talks to a token store directly. It consumes an [`AuthProvider`] for
//! the current credential and the refresh operation, and a [`LoginRedirect`] for the
//! side effect fired when a refresh cycle fails. [`TokenRefreshCoordinator`] guarantees that
//! only one refresh runs at a time no matter how many calls fail concurrently.

pub mod jwt;
pub mod memory;
pub mod refresh;
pub mod secret;

pub use jwt::JwtRefreshProvider;
pub use memory::MemoryCredentials;
pub use refresh::{RefreshMetrics, RefreshTicket, TokenRefreshCoordinator};
pub use secret::TokenSecret;

// self
use crate::_prelude::*;

/// Boxed future returned by [`AuthProvider`] operations.
pub type AuthFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Source of credentials for outgoing calls.
///
/// Implementations must be safe to call concurrently. They do not need to deduplicate
/// refreshes themselves; [`TokenRefreshCoordinator`] ensures only one refresh executes.
pub trait AuthProvider
where
	Self: 'static + Send + Sync,
{
	/// Current access token, if signed in.
	fn access_token(&self) -> Option<TokenSecret>;

	/// Obtains a new access token. Must not route through the coordinator.
	fn refresh_access_token(&self) -> AuthFuture<'_, ()>;

	/// Drops every stored credential.
	fn clear_credentials(&self);

	/// Identity used to namespace per-user rate-limit keys.
	fn identity(&self) -> Option<String>;
}

/// Navigation side effect fired once per failed refresh cycle.
pub trait LoginRedirect
where
	Self: 'static + Send + Sync,
{
	/// Sends the user back to the sign-in surface.
	fn redirect_to_login(&self);
}
impl<F> LoginRedirect for F
where
	F: 'static + Fn() + Send + Sync,
{
	fn redirect_to_login(&self) {
		self()
	}
}

/// [`LoginRedirect`] that does nothing; useful for headless clients.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRedirect;
impl LoginRedirect for NoRedirect {
	fn redirect_to_login(&self) {}
}

/// [`AuthProvider`] for clients that never send credentials.
#[derive(Clone, Copy, Debug, Default)]
pub struct Anonymous;
impl AuthProvider for Anonymous {
	fn access_token(&self) -> Option<TokenSecret> {
		None
	}

	fn refresh_access_token(&self) -> AuthFuture<'_, ()> {
		Box::pin(async {
			Err(AppError::new(ErrorCode::Unauthorized, "No credentials are configured."))
		})
	}

	fn clear_credentials(&self) {}

	fn identity(&self) -> Option<String> {
		None
	}
}
