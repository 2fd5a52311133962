//! Authentication policy and credential resolution.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vibes_models::BackendId;
//! use vibes_models::auth::{CredentialResolver, ProcessEnv};
//!
//! let resolver = CredentialResolver::new(Arc::new(ProcessEnv));
//! let config = resolver.resolve(BackendId::Anthropic, None, None);
//! if resolver.is_valid_auth(BackendId::Anthropic, &config) {
//!     // ready to build a provider
//! }
//! ```

mod discovery;
mod env;
pub mod envelope;
mod policy;
mod resolver;
mod store;

use secrecy::{ExposeSecret, SecretString};

pub use discovery::discover_copilot_token;
pub use env::{Environment, MapEnv, ProcessEnv};
pub use policy::{
    AuthMode, BackendPolicy, CLAUDE_CODE_COMMAND, CredentialKind, LAZY_AUTH_BACKENDS, auth_mode,
    default_base_url, env_vars, get_expected_env_var, is_lazy_auth, missing_credential_message,
    policy,
};
pub use resolver::CredentialResolver;
pub use store::CredentialStore;

/// An API key or token that prevents accidental logging.
///
/// The value is wrapped in `SecretString` which:
/// - Implements `Debug` as `"[REDACTED]"`
/// - Zeroizes memory on drop
/// - Requires explicit `.expose_secret()` to access the value
#[derive(Clone)]
pub struct Secret(SecretString);

impl Secret {
    /// Create a new secret from a string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Expose the secret value.
    ///
    /// Use sparingly - only when actually sending to an API.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// Whether the secret is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.expose_secret().trim().is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
