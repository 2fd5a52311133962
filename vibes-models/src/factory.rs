//! Provider construction.
//!
//! Building a provider never touches the network. A backend whose
//! prerequisites are absent yields `Ok(None)`; an unusable configuration
//! yields `Err`, which the registry logs and treats as "unavailable".

use std::sync::Arc;

use crate::auth::CredentialResolver;
use crate::providers::{
    AnthropicProvider, ClaudeCodeProvider, GoogleProvider, OllamaProvider, OpenAiCompatProvider,
    Provider,
};
use crate::{BackendId, Error, ProviderConfig, Result};

/// Constructs the provider for a backend from its resolved configuration.
pub trait BackendFactory: Send + Sync {
    fn create(&self, backend: BackendId, config: &ProviderConfig)
    -> Result<Option<Arc<dyn Provider>>>;
}

/// Factory for the shipped adapters.
#[derive(Debug, Clone)]
pub struct DefaultFactory {
    resolver: CredentialResolver,
}

impl DefaultFactory {
    /// `resolver` backs the lazy checks of out-of-band authenticated backends.
    pub fn new(resolver: CredentialResolver) -> Self {
        Self { resolver }
    }
}

fn checked_base_url(config: &ProviderConfig) -> Result<Option<String>> {
    let Some(url) = config.effective_base_url() else {
        return Ok(None);
    };
    if config.name == BackendId::Ollama && !url.contains("://") {
        // OLLAMA_HOST is commonly host:port; the provider adds the scheme.
        return Ok(Some(url));
    }
    reqwest::Url::parse(&url).map_err(|e| Error::InvalidBaseUrl(format!("{url}: {e}")))?;
    Ok(Some(url))
}

impl BackendFactory for DefaultFactory {
    fn create(
        &self,
        backend: BackendId,
        config: &ProviderConfig,
    ) -> Result<Option<Arc<dyn Provider>>> {
        let base_url = checked_base_url(config)?;
        let config = config.clone();

        let provider: Arc<dyn Provider> = match (backend, base_url) {
            (BackendId::ClaudeCode, _) => {
                Arc::new(ClaudeCodeProvider::new(config, self.resolver.clone()))
            }
            (_, None) => return Ok(None),
            (BackendId::Anthropic, Some(url)) => Arc::new(AnthropicProvider::new(config, url)),
            (BackendId::Google, Some(url)) => Arc::new(GoogleProvider::new(config, url)),
            (BackendId::Ollama, Some(url)) => Arc::new(OllamaProvider::new(config, &url)),
            (BackendId::Copilot, Some(url)) => Arc::new(
                OpenAiCompatProvider::new(backend, config, url)
                    .with_token_discovery(self.resolver.clone()),
            ),
            (
                BackendId::OpenAi
                | BackendId::Groq
                | BackendId::Mistral
                | BackendId::DeepSeek
                | BackendId::Xai
                | BackendId::OpenRouter
                | BackendId::LmStudio
                | BackendId::OpenAiCompatible,
                Some(url),
            ) => Arc::new(OpenAiCompatProvider::new(backend, config, url)),
        };
        Ok(Some(provider))
    }
}
