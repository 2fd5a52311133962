//! Credential resolution.
//!
//! Each field of a [`ProviderConfig`] is resolved independently:
//!
//! 1. explicit override from a live `set_credentials` call
//! 2. the stored user configuration
//! 3. the first non-empty environment variable mapped for the backend
//!    (opened first if it is a sealed envelope)
//!
//! A field found nowhere stays absent.

use std::sync::Arc;

use tracing::{debug, warn};

use super::discovery::discover_copilot_token;
use super::envelope::{self, SECRET_KEY_ENV};
use super::policy::{
    AuthMode, CLAUDE_CODE_COMMAND, CredentialKind, auth_mode, env_vars,
    missing_credential_message,
};
use super::{Environment, ProcessEnv, Secret};
use crate::{BackendId, CredentialUpdate, ProviderConfig};

/// Resolves effective credentials and validates them against each backend's
/// [`AuthMode`].
#[derive(Clone)]
pub struct CredentialResolver {
    env: Arc<dyn Environment>,
}

impl CredentialResolver {
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self { env }
    }

    /// Resolver over the real process environment.
    pub fn from_process_env() -> Self {
        Self::new(Arc::new(ProcessEnv))
    }

    pub fn env(&self) -> &dyn Environment {
        self.env.as_ref()
    }

    /// Resolve the configuration for `backend`.
    pub fn resolve(
        &self,
        backend: BackendId,
        stored: Option<&ProviderConfig>,
        update: Option<&CredentialUpdate>,
    ) -> ProviderConfig {
        let mut config = stored
            .cloned()
            .unwrap_or_else(|| ProviderConfig::new(backend));
        config.name = backend;

        config.api_key = non_blank(update.and_then(|u| u.api_key.as_deref()))
            .map(Secret::new)
            .or_else(|| stored.and_then(|s| s.api_key.clone()).filter(|s| !s.is_blank()))
            .or_else(|| self.env_value(backend, CredentialKind::ApiKey).map(Secret::new));

        config.auth_token = non_blank(update.and_then(|u| u.auth_token.as_deref()))
            .map(Secret::new)
            .or_else(|| stored.and_then(|s| s.auth_token.clone()).filter(|s| !s.is_blank()))
            .or_else(|| self.env_value(backend, CredentialKind::AuthToken).map(Secret::new));

        config.base_url = non_blank(update.and_then(|u| u.base_url.as_deref()))
            .or_else(|| non_blank(stored.and_then(|s| s.base_url.as_deref())))
            .or_else(|| self.env_value(backend, CredentialKind::BaseUrl));

        if let Some(models) = update.and_then(|u| u.selected_models.clone()) {
            config.selected_models = models;
        }

        config
    }

    /// First non-empty environment value for a credential kind.
    pub fn env_value(&self, backend: BackendId, kind: CredentialKind) -> Option<String> {
        for var in env_vars(backend, kind) {
            let Some(raw) = self.env.var(var) else {
                continue;
            };
            if !envelope::is_sealed(&raw) {
                debug!(provider = %backend, var, "resolved credential from environment");
                return Some(raw.trim().to_string());
            }
            let Some(key) = self.env.var(SECRET_KEY_ENV) else {
                warn!(provider = %backend, var, "sealed value but {SECRET_KEY_ENV} is not set");
                continue;
            };
            match envelope::open(&raw, &key) {
                Ok(secret) => {
                    debug!(provider = %backend, var, "resolved sealed credential from environment");
                    return Some(secret);
                }
                Err(e) => warn!(provider = %backend, var, error = %e, "ignoring sealed value"),
            }
        }
        None
    }

    /// Token found out of band for lazy-auth backends.
    pub fn discover_token(&self, backend: BackendId) -> Option<String> {
        match backend {
            BackendId::Copilot => discover_copilot_token(self.env()),
            _ => None,
        }
    }

    /// Whether the host environment carries credentials for an
    /// [`AuthMode::EnvAuth`] backend.
    pub fn has_host_credentials(&self, backend: BackendId) -> bool {
        match backend {
            BackendId::ClaudeCode => self.env.has_command(CLAUDE_CODE_COMMAND),
            _ => false,
        }
    }

    /// Check `config` against the backend's auth mode.
    pub fn validate(&self, backend: BackendId, config: &ProviderConfig) -> Result<(), String> {
        let has_key = config.api_key.as_ref().is_some_and(|k| !k.is_blank());
        let has_token = config.auth_token.as_ref().is_some_and(|t| !t.is_blank());

        let valid = match auth_mode(backend) {
            AuthMode::ApiKey => has_key,
            AuthMode::AuthOnly => has_token || self.discover_token(backend).is_some(),
            AuthMode::ApiKeyOrAuth => has_key || has_token,
            AuthMode::EnvAuth => self.has_host_credentials(backend),
            AuthMode::BaseUrlOnly => config.effective_base_url().is_some(),
        };

        if valid {
            Ok(())
        } else {
            Err(missing_credential_message(backend))
        }
    }

    /// Whether `config` satisfies the backend's auth mode.
    pub fn is_valid_auth(&self, backend: BackendId, config: &ProviderConfig) -> bool {
        self.validate(backend, config).is_ok()
    }
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolver").finish_non_exhaustive()
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
