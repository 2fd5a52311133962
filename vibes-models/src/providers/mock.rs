//! Mock provider for testing.
//!
//! `MockFactory` hands out `MockProvider`s that replay scripted responses,
//! enabling fast, deterministic tests of routing and fallback without any
//! network access.
//!
//! Each backend registered on the factory owns one [`MockHandle`]. Providers
//! rebuilt for that backend (for example after `set_credentials`) share the
//! handle, so responses queued before a rebuild are still served after it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::{Provider, ProviderEvent, ProviderStream, StopReason, StreamRequest, configured_models};
use crate::factory::BackendFactory;
use crate::{BackendId, Error, ModelDef, ProviderConfig, Result};

/// One scripted reply to `stream_response`.
#[derive(Debug)]
pub enum MockResponse {
    /// Yield these items, then end the stream.
    Events(Vec<Result<ProviderEvent>>),
    /// Fail before streaming starts.
    Reject(Error),
    /// Never yield anything.
    Stall,
}

#[derive(Debug, Default)]
struct Script {
    responses: Mutex<VecDeque<MockResponse>>,
    models: Mutex<Option<Vec<String>>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

/// Controls the responses of one backend's mock providers.
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    script: Arc<Script>,
}

impl MockHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to be served on the next `stream_response`.
    pub fn queue(&self, response: MockResponse) -> &Self {
        self.script
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
        self
    }

    /// A normal reply: the text, then `complete`.
    pub fn queue_content(&self, text: &str) -> &Self {
        self.queue(MockResponse::Events(vec![
            Ok(ProviderEvent::content(text)),
            Ok(ProviderEvent::Complete {
                stop_reason: StopReason::EndTurn,
            }),
        ]))
    }

    /// A stream that completes without producing content.
    pub fn queue_empty(&self) -> &Self {
        self.queue(MockResponse::Events(vec![Ok(ProviderEvent::Complete {
            stop_reason: StopReason::EndTurn,
        })]))
    }

    /// A stream that fails part-way with `message`.
    pub fn queue_error(&self, message: &str) -> &Self {
        self.queue(MockResponse::Events(vec![Err(Error::Stream(message.to_string()))]))
    }

    pub fn queue_events(&self, events: Vec<ProviderEvent>) -> &Self {
        self.queue(MockResponse::Events(events.into_iter().map(Ok).collect()))
    }

    /// Serve exactly these model ids instead of the configured ones.
    pub fn set_models<I, S>(&self, models: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.script.models.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(models.into_iter().map(Into::into).collect());
        self
    }

    /// Number of `stream_response` calls served so far.
    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    /// Model ids requested so far, in order.
    pub fn requested_models(&self) -> Vec<String> {
        self.script
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check if there are queued responses
    pub fn has_queued_responses(&self) -> bool {
        !self
            .script
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    fn next_response(&self) -> Option<MockResponse> {
        self.script
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

/// Provider that replays a [`MockHandle`]'s script.
///
/// Available whenever its configuration is not disabled.
pub struct MockProvider {
    backend: BackendId,
    config: ProviderConfig,
    handle: MockHandle,
}

impl MockProvider {
    pub fn new(backend: BackendId, config: ProviderConfig, handle: MockHandle) -> Self {
        Self {
            backend,
            config,
            handle,
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn backend(&self) -> BackendId {
        self.backend
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn is_available(&self) -> bool {
        !self.config.disabled
    }

    fn list_models(&self) -> Vec<ModelDef> {
        let scripted = self
            .handle
            .script
            .models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match scripted {
            Some(ids) => ids
                .iter()
                .filter(|id| self.config.allows_model(id))
                .map(|id| ModelDef::builder(self.backend, id).build())
                .collect(),
            None => configured_models(self.backend, &self.config),
        }
    }

    async fn stream_response(&self, request: StreamRequest) -> Result<ProviderStream> {
        self.handle.script.calls.fetch_add(1, Ordering::SeqCst);
        self.handle
            .script
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.model.clone());

        match self.handle.next_response() {
            Some(MockResponse::Events(events)) => Ok(Box::pin(tokio_stream::iter(events))),
            Some(MockResponse::Reject(e)) => Err(e),
            Some(MockResponse::Stall) => Ok(Box::pin(futures_util::stream::pending())),
            None => Err(Error::Stream(format!(
                "no queued response in MockProvider for {}",
                self.backend
            ))),
        }
    }
}

/// Factory that builds [`MockProvider`]s for registered backends only.
#[derive(Debug, Default)]
pub struct MockFactory {
    handles: Mutex<HashMap<BackendId, MockHandle>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend`, returning the handle that scripts it.
    pub fn backend(&self, backend: BackendId) -> MockHandle {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(backend)
            .or_default()
            .clone()
    }
}

impl BackendFactory for MockFactory {
    fn create(
        &self,
        backend: BackendId,
        config: &ProviderConfig,
    ) -> Result<Option<Arc<dyn Provider>>> {
        let handle = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&backend)
            .cloned();
        Ok(handle.map(|handle| {
            Arc::new(MockProvider::new(backend, config.clone(), handle)) as Arc<dyn Provider>
        }))
    }
}
