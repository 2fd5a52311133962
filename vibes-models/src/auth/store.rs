//! System keyring storage for secrets set through the CLI.

use tracing::debug;

use super::{CredentialKind, Secret};
use crate::{BackendId, Error, Result};

/// Secure credential storage backed by the system keyring.
///
/// API keys are stored under the account `<backend>`, auth tokens under
/// `<backend>:token`. Environment variables are never consulted here; the
/// credential resolver handles that layer.
///
/// # Thread Safety
///
/// The keyring operations are thread-safe. Multiple instances can
/// access the same credentials.
pub struct CredentialStore {
    service_name: String,
}

impl CredentialStore {
    /// Create a new credential store.
    ///
    /// # Arguments
    ///
    /// * `service_name` - Service identifier for keyring (e.g., "vibes")
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Get a stored secret, `None` if absent or the keyring is unavailable.
    pub fn get(&self, backend: BackendId, kind: CredentialKind) -> Option<Secret> {
        let entry = self.keyring_entry(backend, kind).ok()?;
        let secret = entry.get_password().ok().map(Secret::new)?;
        debug!(provider = %backend, kind = kind.as_str(), "retrieved secret from keyring");
        Some(secret)
    }

    /// Store a secret in the system keyring.
    ///
    /// # Errors
    ///
    /// Returns `Error::Keyring` if the keyring operation fails.
    pub fn set(&self, backend: BackendId, kind: CredentialKind, value: &str) -> Result<()> {
        let entry = self.keyring_entry(backend, kind)?;
        entry
            .set_password(value)
            .map_err(|e| Error::Keyring(e.to_string()))?;
        debug!(provider = %backend, kind = kind.as_str(), "stored secret in keyring");
        Ok(())
    }

    /// Delete a secret from the system keyring.
    ///
    /// # Errors
    ///
    /// Returns `Error::CredentialsNotFound` if nothing was stored, or
    /// `Error::Keyring` if the keyring operation fails.
    pub fn delete(&self, backend: BackendId, kind: CredentialKind) -> Result<()> {
        let entry = self.keyring_entry(backend, kind)?;
        entry.delete_credential().map_err(|e| match e {
            keyring::Error::NoEntry => Error::CredentialsNotFound(backend.to_string()),
            _ => Error::Keyring(e.to_string()),
        })?;
        debug!(provider = %backend, kind = kind.as_str(), "deleted secret from keyring");
        Ok(())
    }

    fn keyring_entry(&self, backend: BackendId, kind: CredentialKind) -> Result<keyring::Entry> {
        let account = account_name(backend, kind)?;
        keyring::Entry::new(&self.service_name, &account).map_err(|e| Error::Keyring(e.to_string()))
    }
}

fn account_name(backend: BackendId, kind: CredentialKind) -> Result<String> {
    match kind {
        CredentialKind::ApiKey => Ok(backend.to_string()),
        CredentialKind::AuthToken => Ok(format!("{backend}:token")),
        CredentialKind::BaseUrl => Err(Error::Keyring(
            "base URLs are stored in config, not the keyring".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_names_per_kind() {
        assert_eq!(
            account_name(BackendId::Anthropic, CredentialKind::ApiKey).unwrap(),
            "anthropic"
        );
        assert_eq!(
            account_name(BackendId::Copilot, CredentialKind::AuthToken).unwrap(),
            "copilot:token"
        );
        assert!(account_name(BackendId::Ollama, CredentialKind::BaseUrl).is_err());
    }

    #[test]
    fn missing_secret_is_none() {
        let store = CredentialStore::new("vibes-test-nonexistent-service");
        assert!(store.get(BackendId::Mistral, CredentialKind::ApiKey).is_none());
    }

    #[test]
    fn base_url_cannot_be_stored() {
        let store = CredentialStore::new("vibes-test-nonexistent-service");
        let err = store
            .set(BackendId::Ollama, CredentialKind::BaseUrl, "http://x")
            .unwrap_err();
        assert!(matches!(err, Error::Keyring(_)));
    }
}
