//! The provider contract and the shipped backend adapters.
//!
//! Every backend is reached through the [`Provider`] trait. Adapters translate
//! their wire protocol into the one [`ProviderEvent`] sequence, so nothing
//! above this module sees a backend's quirks.
//!
//! # Example
//!
//! ```ignore
//! use futures_util::StreamExt;
//! use vibes_models::providers::{Message, Provider, ProviderEvent, StreamRequest};
//!
//! async fn say_hello(provider: &dyn Provider) -> vibes_models::Result<()> {
//!     let request = StreamRequest::new("claude-sonnet-4-5", vec![Message::user("Hello!")]);
//!     let mut stream = provider.stream_response(request).await?;
//!     while let Some(event) = stream.next().await {
//!         if let ProviderEvent::ContentDelta { text } = event? {
//!             print!("{text}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod anthropic;
mod claude_code;
mod framing;
mod google;
mod http;
mod mock;
mod ollama;
mod openai;
mod types;

use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;

pub use anthropic::AnthropicProvider;
pub use claude_code::ClaudeCodeProvider;
pub use google::GoogleProvider;
pub use mock::{MockFactory, MockHandle, MockProvider, MockResponse};
pub use ollama::OllamaProvider;
pub use openai::OpenAiCompatProvider;
pub use types::*;

pub(crate) use ollama::normalize_host as ollama_base_url;

use crate::{BackendId, ModelDef, ProviderConfig, Result, catalog};

/// A stream of normalized events.
///
/// An `Err` item ends the stream: the request failed part-way.
pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent>> + Send>>;

/// A constructed client for one backend.
///
/// Implementations are held as `Arc<dyn Provider>` by the registry and are
/// rebuilt whenever that backend's credentials change.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Backend this provider talks to.
    fn backend(&self) -> BackendId;

    /// Provider name, as shown to operators.
    fn name(&self) -> &str {
        self.backend().as_str()
    }

    /// Configuration the provider was built from.
    fn config(&self) -> &ProviderConfig;

    /// Whether the provider can serve requests right now.
    fn is_available(&self) -> bool;

    /// Models this provider serves, already filtered by `selected_models`.
    fn list_models(&self) -> Vec<ModelDef>;

    /// Whether `model_id` is in [`list_models`](Provider::list_models).
    fn serves(&self, model_id: &str) -> bool {
        self.list_models().iter().any(|m| m.id == model_id)
    }

    /// Start a streaming completion.
    async fn stream_response(&self, request: StreamRequest) -> Result<ProviderStream>;

    /// Re-discover dynamically served models. Most backends have none.
    async fn refresh_models(&self) -> Result<()> {
        Ok(())
    }
}

/// Models a configured backend serves: its catalog entries plus any
/// non-catalog ids the operator selected, filtered by the allowlist.
///
/// Selected ids that the catalog pins to another backend are dropped.
pub fn configured_models(backend: BackendId, config: &ProviderConfig) -> Vec<ModelDef> {
    let mut models: Vec<ModelDef> = catalog::models_for(backend)
        .into_iter()
        .filter(|m| config.allows_model(&m.id))
        .collect();

    for id in &config.selected_models {
        if catalog::lookup(id).is_some() || models.iter().any(|m| &m.id == id) {
            continue;
        }
        models.push(ModelDef::builder(backend, id).build());
    }
    models
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_models_defaults_to_catalog() {
        let config = ProviderConfig::new(BackendId::Xai);
        let ids: Vec<_> = configured_models(BackendId::Xai, &config)
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["grok-4", "grok-3-mini"]);
    }

    #[test]
    fn selected_models_filter_and_extend() {
        let config = ProviderConfig::new(BackendId::OpenAi)
            .with_selected_models(["gpt-5", "ft:gpt-4o:acme", "gemini-2.5-pro"]);
        let models = configured_models(BackendId::OpenAi, &config);
        let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["gpt-5", "ft:gpt-4o:acme"]);
        assert_eq!(models[1].provider, BackendId::OpenAi);
        assert_eq!(models[1].tier, None);
    }

    #[test]
    fn endpoint_backends_serve_only_selected() {
        let config = ProviderConfig::new(BackendId::OpenAiCompatible)
            .with_selected_models(["qwen2.5-coder"]);
        let ids: Vec<_> = configured_models(BackendId::OpenAiCompatible, &config)
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["qwen2.5-coder"]);
        let config = ProviderConfig::new(BackendId::LmStudio);
        assert!(configured_models(BackendId::LmStudio, &config).is_empty());
    }
}
