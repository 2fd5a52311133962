//! Persisted per-backend key state.
//!
//! Two facts survive restarts: that a backend rejected its key (cleared when
//! new credentials are accepted) and that a backend's primary endpoint 404'd
//! while an alternate answered.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{BackendId, Result};

/// Port for the key state. Injected into the registry and its verifier.
///
/// Mutators are synchronous and may touch the filesystem. Callers on an
/// async runtime invoke them only on verification outcomes and credential
/// changes, never per request.
pub trait KeyValidityStore: Send + Sync {
    fn is_invalid(&self, backend: BackendId) -> bool;
    fn mark_invalid(&self, backend: BackendId) -> Result<()>;
    fn clear_invalid(&self, backend: BackendId) -> Result<()>;

    fn endpoint_override(&self, backend: BackendId) -> Option<String>;
    fn set_endpoint_override(&self, backend: BackendId, base_url: &str) -> Result<()>;
    fn clear_endpoint_override(&self, backend: BackendId) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct KeyState {
    #[serde(default)]
    invalid_keys: BTreeSet<BackendId>,
    #[serde(default)]
    endpoint_overrides: BTreeMap<BackendId, String>,
}

impl KeyState {
    /// Apply `change`, returning whether anything changed.
    fn update(&mut self, change: impl FnOnce(&mut KeyState)) -> bool {
        let before = self.clone();
        change(self);
        *self != before
    }
}

/// In-memory store, for tests and embedders without a data directory.
#[derive(Debug, Default)]
pub struct MemoryKeyValidityStore {
    state: Mutex<KeyState>,
}

impl MemoryKeyValidityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut KeyState) -> T) -> T {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl KeyValidityStore for MemoryKeyValidityStore {
    fn is_invalid(&self, backend: BackendId) -> bool {
        self.with_state(|s| s.invalid_keys.contains(&backend))
    }

    fn mark_invalid(&self, backend: BackendId) -> Result<()> {
        self.with_state(|s| s.invalid_keys.insert(backend));
        Ok(())
    }

    fn clear_invalid(&self, backend: BackendId) -> Result<()> {
        self.with_state(|s| s.invalid_keys.remove(&backend));
        Ok(())
    }

    fn endpoint_override(&self, backend: BackendId) -> Option<String> {
        self.with_state(|s| s.endpoint_overrides.get(&backend).cloned())
    }

    fn set_endpoint_override(&self, backend: BackendId, base_url: &str) -> Result<()> {
        self.with_state(|s| s.endpoint_overrides.insert(backend, base_url.to_string()));
        Ok(())
    }

    fn clear_endpoint_override(&self, backend: BackendId) -> Result<()> {
        self.with_state(|s| s.endpoint_overrides.remove(&backend));
        Ok(())
    }
}

/// Store backed by a JSON document, rewritten on every change.
#[derive(Debug)]
pub struct JsonKeyValidityStore {
    path: PathBuf,
    state: Mutex<KeyState>,
}

impl JsonKeyValidityStore {
    /// Open the store at `path`. A missing file is an empty store; an
    /// unreadable one is logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "ignoring corrupt key state file");
                KeyState::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => KeyState::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read key state file");
                KeyState::default()
            }
        };
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Open the store at the default location under the vibes data directory.
    pub fn open_default() -> Self {
        Self::open(vibes_paths::models_state_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn modify(&self, change: impl FnOnce(&mut KeyState)) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.update(change) {
            return Ok(());
        }
        self.persist(&state)
    }

    /// Blocking write of a document of a few hundred bytes, done under the
    /// lock so concurrent changes land in order. Only reached when the
    /// state actually changed.
    fn persist(&self, state: &KeyState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "saved key state");
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&KeyState) -> T) -> T {
        f(&self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl KeyValidityStore for JsonKeyValidityStore {
    fn is_invalid(&self, backend: BackendId) -> bool {
        self.read(|s| s.invalid_keys.contains(&backend))
    }

    fn mark_invalid(&self, backend: BackendId) -> Result<()> {
        self.modify(|s| {
            s.invalid_keys.insert(backend);
        })
    }

    fn clear_invalid(&self, backend: BackendId) -> Result<()> {
        self.modify(|s| {
            s.invalid_keys.remove(&backend);
        })
    }

    fn endpoint_override(&self, backend: BackendId) -> Option<String> {
        self.read(|s| s.endpoint_overrides.get(&backend).cloned())
    }

    fn set_endpoint_override(&self, backend: BackendId, base_url: &str) -> Result<()> {
        self.modify(|s| {
            s.endpoint_overrides.insert(backend, base_url.to_string());
        })
    }

    fn clear_endpoint_override(&self, backend: BackendId) -> Result<()> {
        self.modify(|s| {
            s.endpoint_overrides.remove(&backend);
        })
    }
}
