//! The provider registry.
//!
//! Owns one resolved [`ProviderConfig`] and zero-or-one constructed
//! [`Provider`] per backend, plus the circuit breaker that tracks their
//! health. Routing lives in [`router`](self) and the fallback executor in
//! [`fallback`](self).
//!
//! ```text
//!   stored config ─┐
//!   set_credentials ┼─► CredentialResolver ─► ProviderConfig ─► BackendFactory ─► Provider
//!   environment ───┘                                                               │
//!                                   resolve_provider ◄── CircuitBreaker ◄──────────┘
//!                                          │
//!                                   execute_with_retry ─► ProviderEvent channel
//! ```
//!
//! Locks are only held for map reads and writes, never across an await.

mod fallback;
mod router;
mod types;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures_util::StreamExt;
use tracing::{debug, info, warn};

pub use types::{ProviderStatus, TestConnectionResult};

use crate::auth::{
    CredentialKind, CredentialResolver, Environment, auth_mode, get_expected_env_var,
    is_lazy_auth,
};
use crate::breaker::{CircuitBreaker, CircuitState, Clock, SystemClock};
use crate::factory::{BackendFactory, DefaultFactory};
use crate::providers::{Message, Provider, ProviderEvent, StreamRequest};
use crate::validity::{KeyValidityStore, MemoryKeyValidityStore};
use crate::verify::{ConnectionVerifier, ProbeOutcome};
use crate::{BackendId, CredentialUpdate, Error, FailureKind, OperationResult, ProviderConfig};

const TEST_PROMPT: &str = "ping";
const TEST_MAX_TOKENS: u32 = 16;
const TEST_TIMEOUT: Duration = Duration::from_secs(30);

struct Entry {
    config: ProviderConfig,
    provider: Option<Arc<dyn Provider>>,
}

/// Registry of every backend's configuration, provider and health.
///
/// Owned by the application and shared as `Arc<ModelRegistry>`.
pub struct ModelRegistry {
    entries: RwLock<BTreeMap<BackendId, Entry>>,
    stored: RwLock<HashMap<BackendId, ProviderConfig>>,
    breaker: Mutex<CircuitBreaker>,
    resolver: CredentialResolver,
    factory: Arc<dyn BackendFactory>,
    key_state: Arc<dyn KeyValidityStore>,
    verifier: ConnectionVerifier,
}

/// Builder for [`ModelRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    stored: HashMap<BackendId, ProviderConfig>,
    resolver: Option<CredentialResolver>,
    factory: Option<Arc<dyn BackendFactory>>,
    key_state: Option<Arc<dyn KeyValidityStore>>,
    clock: Option<Arc<dyn Clock>>,
    verifier: Option<ConnectionVerifier>,
}

impl RegistryBuilder {
    /// Stored user configuration for one backend.
    pub fn stored_config(mut self, config: ProviderConfig) -> Self {
        self.stored.insert(config.name, config);
        self
    }

    pub fn stored_configs(mut self, configs: impl IntoIterator<Item = ProviderConfig>) -> Self {
        for config in configs {
            self.stored.insert(config.name, config);
        }
        self
    }

    /// Host environment used for env variables, CLI detection and token discovery.
    pub fn environment(mut self, env: Arc<dyn Environment>) -> Self {
        self.resolver = Some(CredentialResolver::new(env));
        self
    }

    pub fn factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn key_state(mut self, store: Arc<dyn KeyValidityStore>) -> Self {
        self.key_state = Some(store);
        self
    }

    /// Clock for the circuit breaker.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn verifier(mut self, verifier: ConnectionVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Resolve and construct every backend. Performs no network I/O.
    pub fn build(self) -> ModelRegistry {
        let resolver = self
            .resolver
            .unwrap_or_else(CredentialResolver::from_process_env);
        let registry = ModelRegistry {
            entries: RwLock::new(BTreeMap::new()),
            stored: RwLock::new(self.stored),
            breaker: Mutex::new(CircuitBreaker::with_clock(
                self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            )),
            factory: self
                .factory
                .unwrap_or_else(|| Arc::new(DefaultFactory::new(resolver.clone()))),
            key_state: self
                .key_state
                .unwrap_or_else(|| Arc::new(MemoryKeyValidityStore::new())),
            verifier: self
                .verifier
                .unwrap_or_else(|| ConnectionVerifier::new(resolver.clone())),
            resolver,
        };
        registry.init();
        registry
    }
}

impl ModelRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registry over the process environment with no stored configuration.
    pub fn from_env() -> Self {
        Self::builder().build()
    }

    fn init(&self) {
        for backend in BackendId::ALL {
            let stored = self.stored_config(backend);
            let entry = self.build_entry(backend, stored.as_ref(), None);
            self.write_entries().insert(backend, entry);
        }
        let available: Vec<&str> = self
            .get_available()
            .iter()
            .map(|p| p.backend().as_str())
            .collect();
        info!(?available, "model registry initialized");
    }

    /// Resolve, validate and construct one backend.
    fn build_entry(
        &self,
        backend: BackendId,
        stored: Option<&ProviderConfig>,
        update: Option<&CredentialUpdate>,
    ) -> Entry {
        let mut config = self.resolver.resolve(backend, stored, update);
        let explicit_base = update
            .and_then(|u| u.base_url.as_deref())
            .is_some_and(|url| !url.trim().is_empty());
        if !explicit_base && let Some(url) = self.key_state.endpoint_override(backend) {
            debug!(provider = %backend, base_url = %url, "applying endpoint override");
            config.base_url = Some(url);
        }

        if !is_lazy_auth(backend) && !self.resolver.is_valid_auth(backend, &config) {
            config.disabled = true;
        }
        if self.key_state.is_invalid(backend) {
            debug!(provider = %backend, "key previously rejected, disabling");
            config.disabled = true;
        }

        let provider = match self.factory.create(backend, &config) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(provider = %backend, error = %e, "failed to construct provider");
                None
            }
        };
        Entry { config, provider }
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<BackendId, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<BackendId, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.breaker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stored_config(&self, backend: BackendId) -> Option<ProviderConfig> {
        self.stored
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&backend)
            .cloned()
    }

    fn rebuild(&self, backend: BackendId) -> ProviderConfig {
        let stored = self.stored_config(backend);
        let entry = self.build_entry(backend, stored.as_ref(), None);
        let config = entry.config.clone();
        self.write_entries().insert(backend, entry);
        self.breaker().reset(backend);
        config
    }

    // ────────────────────────────────────────────────────────────────────────
    // Queries
    // ────────────────────────────────────────────────────────────────────────

    /// The constructed provider for a backend, if any.
    pub fn get(&self, backend: BackendId) -> Option<Arc<dyn Provider>> {
        self.read_entries()
            .get(&backend)
            .and_then(|e| e.provider.clone())
    }

    /// Effective configuration for a backend.
    pub fn config(&self, backend: BackendId) -> Option<ProviderConfig> {
        self.read_entries().get(&backend).map(|e| e.config.clone())
    }

    /// Providers that can serve requests now, in registration order.
    pub fn get_available(&self) -> Vec<Arc<dyn Provider>> {
        self.read_entries()
            .values()
            .filter_map(|e| e.provider.clone())
            .filter(|p| p.is_available())
            .collect()
    }

    /// Per-backend status, in registration order.
    pub fn get_status(&self) -> Vec<ProviderStatus> {
        let snapshot: Vec<(BackendId, ProviderConfig, Option<Arc<dyn Provider>>)> = self
            .read_entries()
            .iter()
            .map(|(b, e)| (*b, e.config.clone(), e.provider.clone()))
            .collect();

        snapshot
            .into_iter()
            .map(|(backend, config, provider)| ProviderStatus {
                name: backend,
                enabled: !config.disabled,
                authenticated: self.resolver.is_valid_auth(backend, &config),
                available: provider.as_ref().is_some_and(|p| p.is_available()),
                models: provider
                    .as_ref()
                    .map(|p| p.list_models().into_iter().map(|m| m.id).collect())
                    .unwrap_or_default(),
                auth_mode: auth_mode(backend),
                circuit_open: self.breaker().is_open(backend),
                has_api_key: config.api_key.as_ref().is_some_and(|k| !k.is_blank()),
                has_auth_token: config.auth_token.as_ref().is_some_and(|t| !t.is_blank()),
                base_url: config.effective_base_url(),
                invalid_key: self.key_state.is_invalid(backend),
                hide_model_selector: config.hide_model_selector,
            })
            .collect()
    }

    /// Breaker state of a backend, without evaluating its timeout.
    pub fn circuit_state(&self, backend: BackendId) -> CircuitState {
        self.breaker().state(backend)
    }

    /// Environment variable consulted first for a credential kind, or empty.
    pub fn get_expected_env_var(&self, backend: BackendId, kind: CredentialKind) -> String {
        get_expected_env_var(backend, kind)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Credential updates
    // ────────────────────────────────────────────────────────────────────────

    /// Apply new credentials to a backend.
    ///
    /// Validates against the backend's auth mode, rebuilds its provider and
    /// resets its circuit. On success the values become part of the stored
    /// configuration and any invalid-key marker is cleared.
    pub fn set_credentials(&self, backend: BackendId, update: CredentialUpdate) -> OperationResult {
        let stored = self.stored_config(backend);
        let mut config = self.resolver.resolve(backend, stored.as_ref(), Some(&update));
        let explicit_base = update
            .base_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty());
        if !explicit_base && let Some(url) = self.key_state.endpoint_override(backend) {
            config.base_url = Some(url);
        }

        if let Err(message) = self.resolver.validate(backend, &config) {
            debug!(provider = %backend, %message, "rejected credentials");
            return OperationResult::failed(message);
        }
        config.disabled = false;

        let provider = match self.factory.create(backend, &config) {
            Ok(Some(provider)) => provider,
            Ok(None) => return OperationResult::failed("baseUrl is required"),
            Err(e) => return OperationResult::failed(e.to_string()),
        };

        if let Err(e) = self.key_state.clear_invalid(backend) {
            warn!(provider = %backend, error = %e, "failed to clear invalid key marker");
        }
        if explicit_base && let Err(e) = self.key_state.clear_endpoint_override(backend) {
            warn!(provider = %backend, error = %e, "failed to clear endpoint override");
        }
        self.breaker().reset(backend);
        self.store_update(backend, stored, &update);
        self.write_entries().insert(
            backend,
            Entry {
                config,
                provider: Some(provider),
            },
        );
        info!(provider = %backend, "credentials updated");
        OperationResult::ok()
    }

    fn store_update(
        &self,
        backend: BackendId,
        stored: Option<ProviderConfig>,
        update: &CredentialUpdate,
    ) {
        let mut next = stored.unwrap_or_else(|| ProviderConfig::new(backend));
        let non_blank = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        if let Some(key) = non_blank(&update.api_key) {
            next.api_key = Some(key.into());
        }
        if let Some(token) = non_blank(&update.auth_token) {
            next.auth_token = Some(token.into());
        }
        if let Some(url) = non_blank(&update.base_url) {
            next.base_url = Some(url);
        }
        if let Some(models) = &update.selected_models {
            next.selected_models = models.clone();
        }
        next.disabled = false;
        self.stored
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(backend, next);
    }

    /// Forget the stored API key and token for a backend and rebuild it.
    ///
    /// Credentials that come from the environment are re-detected.
    pub fn remove_api_key(&self, backend: BackendId) -> OperationResult {
        if let Some(stored) = self
            .stored
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&backend)
        {
            stored.api_key = None;
            stored.auth_token = None;
        }
        let config = self.rebuild(backend);
        info!(provider = %backend, enabled = !config.disabled, "stored key removed");
        OperationResult::ok()
    }

    /// Re-resolve a backend from stored configuration and environment.
    pub fn refresh_provider(&self, backend: BackendId) -> OperationResult {
        let config = self.rebuild(backend);
        if let Err(message) = self.resolver.validate(backend, &config) {
            return OperationResult::failed(message);
        }
        if self.get(backend).is_none() {
            return OperationResult::failed(format!("failed to construct provider for {backend}"));
        }
        OperationResult::ok()
    }

    /// Re-discover dynamically served models on every available provider.
    pub async fn refresh_models(&self) {
        for provider in self.get_available() {
            if let Err(e) = provider.refresh_models().await {
                warn!(provider = %provider.backend(), error = %e, "model refresh failed");
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Verification
    // ────────────────────────────────────────────────────────────────────────

    /// Mark a backend's key rejected and disable its provider.
    fn mark_unauthorized(&self, backend: BackendId) {
        if let Err(e) = self.key_state.mark_invalid(backend) {
            warn!(provider = %backend, error = %e, "failed to persist invalid key marker");
        }
        let mut entries = self.write_entries();
        if let Some(entry) = entries.get_mut(&backend) {
            entry.config.disabled = true;
            entry.provider = self.factory.create(backend, &entry.config).unwrap_or(None);
        }
        warn!(provider = %backend, "credentials rejected, provider disabled");
    }

    /// Check that credentials work with one minimal authenticated request.
    ///
    /// Without `credentials` the backend's current configuration is probed;
    /// a rejection then marks the key invalid and disables the provider.
    /// Candidate credentials are probed without touching live state, except
    /// that a confirmed alternate endpoint is always recorded.
    pub async fn verify_connection(
        &self,
        backend: BackendId,
        credentials: Option<CredentialUpdate>,
    ) -> OperationResult {
        let live = credentials.is_none();
        let config = match &credentials {
            Some(update) => {
                let stored = self.stored_config(backend);
                self.resolver.resolve(backend, stored.as_ref(), Some(update))
            }
            None => match self.config(backend) {
                Some(config) => config,
                None => {
                    return OperationResult::failed(
                        Error::ProviderNotFound(backend.to_string()).to_string(),
                    );
                }
            },
        };

        match self.verifier.probe(backend, &config).await {
            ProbeOutcome::Verified { endpoint_override } => {
                if let Some(url) = &endpoint_override
                    && let Err(e) = self.key_state.set_endpoint_override(backend, url)
                {
                    warn!(provider = %backend, error = %e, "failed to persist endpoint override");
                }
                if live {
                    let was_invalid = self.key_state.is_invalid(backend);
                    if was_invalid && let Err(e) = self.key_state.clear_invalid(backend) {
                        warn!(provider = %backend, error = %e, "failed to clear invalid key marker");
                    }
                    // The marker disabled the entry at build time.
                    if was_invalid || endpoint_override.is_some() {
                        self.rebuild(backend);
                    }
                }
                info!(provider = %backend, "connection verified");
                OperationResult::ok()
            }
            ProbeOutcome::Unauthorized(message) => {
                if live {
                    self.mark_unauthorized(backend);
                }
                OperationResult::failed(message)
            }
            ProbeOutcome::Failed(e) => {
                warn!(provider = %backend, error = %e, "connection verification failed");
                OperationResult::failed(e.to_string())
            }
        }
    }

    /// Send a tiny completion through the backend's provider, classifying
    /// credit exhaustion separately from authentication failures.
    pub async fn test_connection(&self, backend: BackendId) -> TestConnectionResult {
        let Some(provider) = self.get(backend) else {
            return TestConnectionResult::failed(
                None,
                Error::ProviderNotFound(backend.to_string()).to_string(),
            );
        };
        if !provider.is_available() {
            return TestConnectionResult::failed(
                None,
                crate::auth::missing_credential_message(backend),
            );
        }
        let Some(model) = provider.list_models().into_iter().next() else {
            let result = self.verify_connection(backend, None).await;
            return match result.error {
                None => TestConnectionResult::ok(),
                Some(error) => TestConnectionResult::failed(None, error),
            };
        };

        let request = StreamRequest::new(model.id, vec![Message::user(TEST_PROMPT)])
            .max_tokens(TEST_MAX_TOKENS);
        let cancel = request.cancellation.clone();
        let outcome = tokio::time::timeout(TEST_TIMEOUT, async {
            let mut stream = provider.stream_response(request).await?;
            while let Some(event) = stream.next().await {
                match event? {
                    ProviderEvent::Error { message } => return Err(Error::Stream(message)),
                    ProviderEvent::Complete { .. } => break,
                    event if event.is_content_bearing() => break,
                    _ => {}
                }
            }
            Ok::<(), Error>(())
        })
        .await;
        cancel.cancel();

        let error = match outcome {
            Ok(Ok(())) => return TestConnectionResult::ok(),
            Ok(Err(e)) => e,
            Err(_) => Error::Timeout(format!("no response within {}s", TEST_TIMEOUT.as_secs())),
        };
        let status = match &error {
            Error::ProviderApi { status, .. } => Some(*status),
            _ => None,
        };
        match error.classify() {
            FailureKind::Quota => TestConnectionResult {
                ok: false,
                status,
                out_of_credits: true,
                error: Some(error.to_string()),
            },
            FailureKind::Auth => {
                self.mark_unauthorized(backend);
                TestConnectionResult::failed(status, error.to_string())
            }
            FailureKind::Network | FailureKind::Other => {
                TestConnectionResult::failed(status, error.to_string())
            }
        }
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("backends", &self.read_entries().len())
            .field("breaker", &*self.breaker())
            .finish_non_exhaustive()
    }
}
