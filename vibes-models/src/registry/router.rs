//! Model-to-provider routing.

use std::sync::Arc;

use tracing::debug;

use super::ModelRegistry;
use crate::providers::Provider;
use crate::{BackendId, catalog};

/// Where a model id routes to.
pub(crate) enum Route {
    Found(Arc<dyn Provider>),
    /// The only backends that could serve it have an open circuit.
    CircuitOpen(BackendId),
    NotFound,
}

impl ModelRegistry {
    /// Pick the provider that should serve `model_id`.
    ///
    /// Catalog models only ever route to the backend they are pinned to.
    /// Other ids go to `preferred` when it serves them, then to the first
    /// backend in registration order that does. Unavailable backends and
    /// backends with an open circuit are skipped.
    pub fn resolve_provider(
        &self,
        model_id: &str,
        preferred: Option<BackendId>,
    ) -> Option<Arc<dyn Provider>> {
        match self.route(model_id, preferred) {
            Route::Found(provider) => Some(provider),
            Route::CircuitOpen(_) | Route::NotFound => None,
        }
    }

    pub(crate) fn route(&self, model_id: &str, preferred: Option<BackendId>) -> Route {
        if let Some(entry) = catalog::lookup(model_id) {
            let backend = entry.provider;
            let Some(provider) = self.get(backend).filter(|p| p.is_available()) else {
                debug!(model = model_id, provider = %backend, "pinned provider unavailable");
                return Route::NotFound;
            };
            if self.breaker().is_open(backend) {
                return Route::CircuitOpen(backend);
            }
            return Route::Found(provider);
        }

        let mut blocked = None;
        let order = preferred
            .into_iter()
            .chain(BackendId::ALL.into_iter().filter(|b| Some(*b) != preferred));
        for backend in order {
            let Some(provider) = self.get(backend) else {
                continue;
            };
            if !provider.is_available() || !provider.serves(model_id) {
                continue;
            }
            if self.breaker().is_open(backend) {
                blocked.get_or_insert(backend);
                continue;
            }
            debug!(model = model_id, provider = %backend, "routed model");
            return Route::Found(provider);
        }

        match blocked {
            Some(backend) => Route::CircuitOpen(backend),
            None => Route::NotFound,
        }
    }
}
