//! Static model catalog.
//!
//! Every model listed here is pinned to the backend it is declared under: the
//! router never serves a catalog model from any other backend.

use crate::{BackendId, Capabilities, ModelDef, Tier};

/// Version of the catalog table. Bump when entries are added or re-pinned.
pub const CATALOG_VERSION: &str = "2025.10";

/// A statically-known model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: &'static str,
    pub provider: BackendId,
    pub tier: Option<Tier>,
    pub context_window: u32,
    pub max_output: u32,
    pub capabilities: Capabilities,
}

impl CatalogEntry {
    const fn new(
        id: &'static str,
        provider: BackendId,
        tier: Tier,
        context_window: u32,
        max_output: u32,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            id,
            provider,
            tier: Some(tier),
            context_window,
            max_output,
            capabilities,
        }
    }

    /// Convert to an owned model definition.
    pub fn to_model_def(&self) -> ModelDef {
        ModelDef {
            id: self.id.to_string(),
            provider: self.provider,
            tier: self.tier,
            context_window: self.context_window,
            max_output: Some(self.max_output),
            capabilities: self.capabilities,
        }
    }
}

use BackendId as B;
use Tier as T;

const FULL: Capabilities = Capabilities::full();
const REASON: Capabilities = Capabilities::full_reasoning();
const TOOLS: Capabilities = Capabilities::tools();
const TOOLS_REASON: Capabilities = Capabilities {
    reasoning: true,
    ..Capabilities::tools()
};

static CATALOG: &[CatalogEntry] = &[
    CatalogEntry::new("claude-opus-4-1", B::Anthropic, T::Flagship, 200_000, 32_000, REASON),
    CatalogEntry::new("claude-sonnet-4-5", B::Anthropic, T::Flagship, 200_000, 64_000, REASON),
    CatalogEntry::new("claude-haiku-4-5", B::Anthropic, T::Fast, 200_000, 64_000, REASON),
    CatalogEntry::new("claude-3-5-haiku-latest", B::Anthropic, T::Cheap, 200_000, 8_192, FULL),
    CatalogEntry::new("gpt-5", B::OpenAi, T::Flagship, 400_000, 128_000, REASON),
    CatalogEntry::new("gpt-5-mini", B::OpenAi, T::Fast, 400_000, 128_000, REASON),
    CatalogEntry::new("gpt-4.1", B::OpenAi, T::Flagship, 1_047_576, 32_768, FULL),
    CatalogEntry::new("gpt-4o-mini", B::OpenAi, T::Cheap, 128_000, 16_384, FULL),
    CatalogEntry::new("o3", B::OpenAi, T::Reasoning, 200_000, 100_000, REASON),
    CatalogEntry::new("o4-mini", B::OpenAi, T::Reasoning, 200_000, 100_000, REASON),
    CatalogEntry::new("gemini-2.5-pro", B::Google, T::Flagship, 1_048_576, 65_536, REASON),
    CatalogEntry::new("gemini-2.5-flash", B::Google, T::Fast, 1_048_576, 65_536, REASON),
    CatalogEntry::new("gemini-2.0-flash-lite", B::Google, T::Cheap, 1_048_576, 8_192, FULL),
    CatalogEntry::new("llama-3.3-70b-versatile", B::Groq, T::Fast, 131_072, 32_768, TOOLS),
    CatalogEntry::new("mistral-large-latest", B::Mistral, T::Flagship, 131_072, 8_192, TOOLS),
    CatalogEntry::new("codestral-latest", B::Mistral, T::Fast, 256_000, 8_192, TOOLS),
    CatalogEntry::new("deepseek-chat", B::DeepSeek, T::Cheap, 128_000, 8_192, TOOLS),
    CatalogEntry::new("deepseek-reasoner", B::DeepSeek, T::Reasoning, 128_000, 64_000, TOOLS_REASON),
    CatalogEntry::new("grok-4", B::Xai, T::Flagship, 256_000, 64_000, REASON),
    CatalogEntry::new("grok-3-mini", B::Xai, T::Cheap, 131_072, 16_384, TOOLS_REASON),
    CatalogEntry::new("claude-code-sonnet", B::ClaudeCode, T::Flagship, 200_000, 64_000, REASON),
    CatalogEntry::new("claude-code-opus", B::ClaudeCode, T::Reasoning, 200_000, 32_000, REASON),
];

/// All catalog entries, grouped by backend in registration order.
pub fn entries() -> &'static [CatalogEntry] {
    CATALOG
}

/// Look up a model id in the catalog.
pub fn lookup(model_id: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|entry| entry.id == model_id)
}

/// Catalog models declared under `backend`.
pub fn models_for(backend: BackendId) -> Vec<ModelDef> {
    CATALOG
        .iter()
        .filter(|entry| entry.provider == backend)
        .map(CatalogEntry::to_model_def)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn lookup_finds_pinned_backend() {
        assert_eq!(lookup("gpt-5").unwrap().provider, BackendId::OpenAi);
        assert_eq!(lookup("gemini-2.5-pro").unwrap().provider, BackendId::Google);
        assert!(lookup("qwen2.5-coder").is_none());
    }

    #[test]
    fn ids_are_unique() {
        let mut seen = HashSet::new();
        for entry in entries() {
            assert!(seen.insert(entry.id), "duplicate catalog id {}", entry.id);
        }
    }

    #[test]
    fn every_entry_has_a_tier() {
        assert!(entries().iter().all(|e| e.tier.is_some()));
    }

    #[test]
    fn models_for_filters_by_backend() {
        let models = models_for(BackendId::DeepSeek);
        let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["deepseek-chat", "deepseek-reasoner"]);
        assert!(models_for(BackendId::Ollama).is_empty());
    }

    #[test]
    fn to_model_def_carries_tier_and_limits() {
        let def = lookup("o3").unwrap().to_model_def();
        assert_eq!(def.tier, Some(Tier::Reasoning));
        assert_eq!(def.max_output, Some(100_000));
        assert!(def.capabilities.reasoning);
    }
}
