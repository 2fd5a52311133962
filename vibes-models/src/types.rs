//! Core types for model definitions.

use serde::{Deserialize, Serialize};

use crate::BackendId;

/// Capability tier a catalog model is positioned at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Most capable model of a family.
    Flagship,
    /// Low-latency model.
    Fast,
    /// Extended-thinking model.
    Reasoning,
    /// Lowest-cost model.
    Cheap,
}

/// Model capabilities indicating what features the model supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Supports chat/conversation.
    pub chat: bool,
    /// Supports vision/image input.
    pub vision: bool,
    /// Supports tool/function calling.
    pub tools: bool,
    /// Emits thinking/reasoning output.
    pub reasoning: bool,
    /// Supports streaming responses.
    pub streaming: bool,
}

impl Capabilities {
    /// Create capabilities for a chat model.
    pub const fn chat() -> Self {
        Self {
            chat: true,
            vision: false,
            tools: false,
            reasoning: false,
            streaming: true,
        }
    }

    /// Chat with tool calling.
    pub const fn tools() -> Self {
        Self {
            tools: true,
            ..Self::chat()
        }
    }

    /// Create capabilities for a full-featured model.
    pub const fn full() -> Self {
        Self {
            chat: true,
            vision: true,
            tools: true,
            reasoning: false,
            streaming: true,
        }
    }

    /// Full-featured model that also reasons.
    pub const fn full_reasoning() -> Self {
        Self {
            reasoning: true,
            ..Self::full()
        }
    }

    /// Check if every capability requested by `filter` is present.
    pub fn matches(&self, filter: &Capabilities) -> bool {
        (!filter.chat || self.chat)
            && (!filter.vision || self.vision)
            && (!filter.tools || self.tools)
            && (!filter.reasoning || self.reasoning)
            && (!filter.streaming || self.streaming)
    }
}

/// A model a backend can serve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    /// Model identifier as sent to the backend.
    pub id: String,
    /// Backend serving this model.
    pub provider: BackendId,
    /// Capability tier, for catalog models.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    /// Maximum context window size in tokens.
    pub context_window: u32,
    /// Maximum output tokens (if limited).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output: Option<u32>,
    /// Model capabilities.
    pub capabilities: Capabilities,
}

impl ModelDef {
    /// Create a new model definition builder.
    pub fn builder(provider: BackendId, id: &str) -> ModelDefBuilder {
        ModelDefBuilder::new(provider, id)
    }

    /// Whether the model runs on the local machine.
    pub fn is_local(&self) -> bool {
        self.provider.is_local()
    }
}

/// Builder for constructing `ModelDef`.
#[derive(Debug)]
pub struct ModelDefBuilder {
    provider: BackendId,
    id: String,
    tier: Option<Tier>,
    context_window: u32,
    max_output: Option<u32>,
    capabilities: Capabilities,
}

impl ModelDefBuilder {
    fn new(provider: BackendId, id: &str) -> Self {
        Self {
            provider,
            id: id.to_string(),
            tier: None,
            context_window: 8192,
            max_output: None,
            capabilities: Capabilities::chat(),
        }
    }

    /// Set the tier.
    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    /// Set the context window size.
    pub fn context_window(mut self, tokens: u32) -> Self {
        self.context_window = tokens;
        self
    }

    /// Set the maximum output tokens.
    pub fn max_output(mut self, tokens: u32) -> Self {
        self.max_output = Some(tokens);
        self
    }

    /// Set the model capabilities.
    pub fn capabilities(mut self, caps: Capabilities) -> Self {
        self.capabilities = caps;
        self
    }

    /// Build the `ModelDef`.
    pub fn build(self) -> ModelDef {
        ModelDef {
            id: self.id,
            provider: self.provider,
            tier: self.tier,
            context_window: self.context_window,
            max_output: self.max_output,
            capabilities: self.capabilities,
        }
    }
}
