//! Thread-safe in-process credential holder.

// self
use crate::{_prelude::*, auth::TokenSecret};

#[derive(Clone, Debug, Default)]
struct CredentialSet {
	access: Option<TokenSecret>,
	refresh: Option<TokenSecret>,
	identity: Option<String>,
}

/// Access/refresh token pair plus the signed-in identity, shared between clones.
#[derive(Clone, Debug, Default)]
pub struct MemoryCredentials(Arc<RwLock<CredentialSet>>);
impl MemoryCredentials {
	/// Creates a holder seeded with both tokens.
	pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
		let credentials = Self::default();

		credentials.store(access, Some(refresh.into()));

		credentials
	}

	/// Sets the identity used for per-user rate-limit keys.
	pub fn with_identity(self, identity: impl Into<String>) -> Self {
		self.0.write().identity = Some(identity.into());

		self
	}

	/// Current access token.
	pub fn access(&self) -> Option<TokenSecret> {
		self.0.read().access.clone()
	}

	/// Current refresh token.
	pub fn refresh(&self) -> Option<TokenSecret> {
		self.0.read().refresh.clone()
	}

	/// Signed-in identity.
	pub fn identity(&self) -> Option<String> {
		self.0.read().identity.clone()
	}

	/// Replaces the access token and, when provided, rotates the refresh token.
	pub fn store(&self, access: impl Into<String>, refresh: Option<String>) {
		let mut set = self.0.write();

		set.access = Some(TokenSecret::new(access));

		if let Some(refresh) = refresh {
			set.refresh = Some(TokenSecret::new(refresh));
		}
	}

	/// Drops both tokens and the identity.
	pub fn clear(&self) {
		*self.0.write() = CredentialSet::default();
	}

	/// Returns `true` while an access token is held.
	pub fn is_signed_in(&self) -> bool {
		self.0.read().access.is_some()
	}
}
