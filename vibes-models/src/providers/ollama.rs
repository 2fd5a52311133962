//! Ollama local model provider.
//!
//! Connects to a local Ollama instance for running models like Llama, Mistral, etc.
//!
//! # Example
//!
//! ```ignore
//! use vibes_models::providers::OllamaProvider;
//!
//! let provider = OllamaProvider::new(config, "http://localhost:11434");
//! provider.refresh_models().await?;
//! ```

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::framing::{EventTranslator, Frame, Framing, event_stream, response_bytes};
use super::{
    Message, Provider, ProviderEvent, ProviderStream, Role, StopReason, StreamRequest, Usage,
    configured_models, http,
};
use crate::{BackendId, Capabilities, Error, ModelDef, ProviderConfig, Result};

// ────────────────────────────────────────────────────────────────────────────
// Ollama API Types
// ────────────────────────────────────────────────────────────────────────────

/// Response from Ollama's `/api/tags` endpoint.
#[derive(Debug, Deserialize)]
pub struct OllamaTagsResponse {
    pub models: Vec<OllamaModel>,
}

/// Model information from Ollama's API.
#[derive(Debug, Deserialize)]
pub struct OllamaModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

impl OllamaModel {
    /// Convert to a `ModelDef`.
    pub fn to_model_def(&self) -> ModelDef {
        ModelDef::builder(BackendId::Ollama, &self.name)
            .context_window(8192) // Default, varies by model
            .capabilities(Capabilities::chat())
            .build()
    }
}

/// Message in an Ollama chat request/response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<OllamaToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaToolCall {
    pub function: OllamaFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Request body for Ollama's `/api/chat` endpoint.
#[derive(Debug, Serialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<OllamaChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub think: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<OllamaChatOptions>,
}

/// Chat options for Ollama.
#[derive(Debug, Serialize)]
pub struct OllamaChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

/// One NDJSON line from Ollama's streaming `/api/chat`.
#[derive(Debug, Deserialize)]
pub struct OllamaChatResponse {
    #[serde(default)]
    pub message: OllamaChatMessage,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl OllamaChatRequest {
    fn from_request(request: &StreamRequest) -> Self {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system_prompt {
            messages.push(OllamaChatMessage {
                role: "system".to_string(),
                content: system.clone(),
                ..Default::default()
            });
        }
        messages.extend(request.messages.iter().map(to_ollama_message));

        let options = if request.temperature.is_some() || request.max_tokens.is_some() {
            Some(OllamaChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            })
        } else {
            None
        };

        Self {
            model: request.model.clone(),
            messages,
            stream: true,
            tools: request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {"name": t.name, "description": t.description, "parameters": t.parameters},
                    })
                })
                .collect(),
            think: request.reasoning_level.map(|_| true),
            options,
        }
    }
}

fn to_ollama_message(message: &Message) -> OllamaChatMessage {
    let images = match &message.content {
        super::Content::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                super::ContentPart::Image { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect(),
        super::Content::Text(_) => Vec::new(),
    };
    OllamaChatMessage {
        role: match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
        .to_string(),
        content: message.content.as_text(),
        thinking: None,
        tool_calls: message
            .tool_calls
            .iter()
            .map(|call| OllamaToolCall {
                function: OllamaFunction {
                    name: call.name.clone(),
                    arguments: serde_json::from_str(&call.arguments).unwrap_or(Value::Null),
                },
            })
            .collect(),
        images,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Translator
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct OllamaTranslator {
    calls: usize,
    done: bool,
}

impl EventTranslator for OllamaTranslator {
    fn translate(&mut self, frame: Frame) -> Result<Vec<ProviderEvent>> {
        let chunk: OllamaChatResponse = serde_json::from_str(&frame.data)?;
        if let Some(error) = chunk.error {
            return Err(Error::Stream(error));
        }

        let mut out = Vec::new();
        if let Some(thinking) = chunk.message.thinking.filter(|t| !t.is_empty()) {
            out.push(ProviderEvent::thinking(thinking));
        }
        if !chunk.message.content.is_empty() {
            out.push(ProviderEvent::content(chunk.message.content));
        }
        for call in chunk.message.tool_calls {
            self.calls += 1;
            let id = format!("call_{}", self.calls);
            out.push(ProviderEvent::ToolUseStart {
                id: id.clone(),
                name: call.function.name,
            });
            out.push(ProviderEvent::ToolUseDelta {
                id: id.clone(),
                partial_json: call.function.arguments.to_string(),
            });
            out.push(ProviderEvent::ToolUseStop { id });
        }

        if chunk.done {
            self.done = true;
            out.push(ProviderEvent::UsageUpdate {
                usage: Usage::new(
                    chunk.prompt_eval_count.unwrap_or(0),
                    chunk.eval_count.unwrap_or(0),
                ),
            });
            let stop_reason = match chunk.done_reason.as_deref() {
                Some("length") => StopReason::MaxTokens,
                _ if self.calls > 0 => StopReason::ToolUse,
                _ => StopReason::EndTurn,
            };
            out.push(ProviderEvent::Complete { stop_reason });
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<ProviderEvent>> {
        if self.done {
            Ok(Vec::new())
        } else {
            Err(Error::Stream("ollama stream ended before done".to_string()))
        }
    }
}

/// `OLLAMA_HOST` is often set without a scheme.
pub(crate) fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OllamaProvider
// ────────────────────────────────────────────────────────────────────────────

/// Ollama local model provider.
///
/// Serves the models installed in the Ollama instance, discovered with
/// [`refresh_models`](Provider::refresh_models), plus any selected ids.
pub struct OllamaProvider {
    config: ProviderConfig,
    base_url: String,
    client: reqwest::Client,
    cached_models: RwLock<Vec<ModelDef>>,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig, base_url: &str) -> Self {
        Self {
            config,
            base_url: normalize_host(base_url),
            client: http::client(),
            cached_models: RwLock::new(Vec::new()),
        }
    }

    /// Get the base URL for this provider.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn set_models(&self, models: Vec<ModelDef>) {
        *self
            .cached_models
            .write()
            .unwrap_or_else(PoisonError::into_inner) = models;
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn backend(&self) -> BackendId {
        BackendId::Ollama
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn is_available(&self) -> bool {
        !self.config.disabled && !self.base_url.is_empty()
    }

    fn list_models(&self) -> Vec<ModelDef> {
        let mut models = configured_models(BackendId::Ollama, &self.config);
        let cached = self
            .cached_models
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for model in cached.iter() {
            if self.config.allows_model(&model.id) && !models.iter().any(|m| m.id == model.id) {
                models.push(model.clone());
            }
        }
        models
    }

    async fn stream_response(&self, request: StreamRequest) -> Result<ProviderStream> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaChatRequest::from_request(&request);
        let builder = http::with_headers(self.client.post(url).json(&body), &self.config.headers);

        debug!(provider = "ollama", model = %request.model, "starting stream");
        let response = http::send(builder).await?;
        Ok(event_stream(
            response_bytes(response),
            Framing::JsonLines,
            OllamaTranslator::default(),
            request.cancellation,
        ))
    }

    /// Fetches models from `/api/tags` and updates the cache.
    async fn refresh_models(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);
        let response = http::send(self.client.get(&url)).await?;
        let tags: OllamaTagsResponse = response.json().await.map_err(Error::from_reqwest)?;

        let models: Vec<ModelDef> = tags.models.iter().map(OllamaModel::to_model_def).collect();
        debug!(provider = "ollama", count = models.len(), "refreshed models");
        self.set_models(models);
        Ok(())
    }
}
