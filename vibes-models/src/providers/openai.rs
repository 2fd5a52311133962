//! OpenAI Chat Completions provider.
//!
//! Serves every backend that speaks the Chat Completions wire format:
//! OpenAI itself, Groq, Mistral, DeepSeek, xAI, OpenRouter, GitHub Copilot,
//! LM Studio and any operator-configured compatible endpoint.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::framing::{EventTranslator, Frame, Framing, event_stream, response_bytes};
use super::{
    Content, ContentPart, Message, Provider, ProviderEvent, ProviderStream, Role, StopReason,
    StreamRequest, Usage, configured_models, http,
};
use crate::auth::{AuthMode, CredentialResolver, auth_mode};
use crate::{BackendId, Error, ModelDef, ProviderConfig, Result};

const DONE: &str = "[DONE]";
const COPILOT_INTEGRATION_ID: &str = "vscode-chat";

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "reasoning")]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    #[serde(default)]
    message: String,
}

fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Translator
// ────────────────────────────────────────────────────────────────────────────

/// Chat Completions chunks to [`ProviderEvent`]s. Tool calls are keyed by
/// their `index`; only the first delta for an index carries id and name.
#[derive(Debug, Default)]
struct ChatTranslator {
    tools: BTreeMap<u32, String>,
    finish: Option<StopReason>,
    done: bool,
}

impl ChatTranslator {
    fn close_tools(&mut self, out: &mut Vec<ProviderEvent>) {
        for (_, id) in std::mem::take(&mut self.tools) {
            out.push(ProviderEvent::ToolUseStop { id });
        }
    }

    fn complete(&mut self, out: &mut Vec<ProviderEvent>) {
        self.close_tools(out);
        self.done = true;
        out.push(ProviderEvent::Complete {
            stop_reason: self.finish.unwrap_or(StopReason::EndTurn),
        });
    }

    fn apply_tool_delta(&mut self, call: ToolCallDelta, out: &mut Vec<ProviderEvent>) {
        let function = call.function.unwrap_or(FunctionDelta {
            name: None,
            arguments: None,
        });
        let id = match self.tools.get(&call.index) {
            Some(id) => id.clone(),
            None => {
                let id = call
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}", call.index));
                self.tools.insert(call.index, id.clone());
                out.push(ProviderEvent::ToolUseStart {
                    id: id.clone(),
                    name: function.name.unwrap_or_default(),
                });
                id
            }
        };
        if let Some(partial_json) = function.arguments.filter(|a| !a.is_empty()) {
            out.push(ProviderEvent::ToolUseDelta { id, partial_json });
        }
    }
}

impl EventTranslator for ChatTranslator {
    fn translate(&mut self, frame: Frame) -> Result<Vec<ProviderEvent>> {
        let mut out = Vec::new();
        let data = frame.data.trim();
        if data.is_empty() || self.done {
            return Ok(out);
        }
        if data == DONE {
            self.complete(&mut out);
            return Ok(out);
        }

        let chunk: ChatChunk = serde_json::from_str(data)?;
        if let Some(error) = chunk.error {
            return Err(Error::Stream(error.message));
        }

        for choice in chunk.choices {
            let delta = choice.delta.unwrap_or_default();
            if let Some(text) = delta.reasoning_content.filter(|t| !t.is_empty()) {
                out.push(ProviderEvent::thinking(text));
            }
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                out.push(ProviderEvent::content(text));
            }
            for call in delta.tool_calls {
                self.apply_tool_delta(call, &mut out);
            }
            if let Some(reason) = choice.finish_reason.as_deref() {
                self.finish = Some(map_finish_reason(reason));
                self.close_tools(&mut out);
            }
        }

        if let Some(usage) = chunk.usage {
            out.push(ProviderEvent::UsageUpdate {
                usage: Usage::new(usage.prompt_tokens, usage.completion_tokens),
            });
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<ProviderEvent>> {
        let mut out = Vec::new();
        if self.done {
            return Ok(out);
        }
        // Some compatible servers close the stream without the [DONE] marker.
        if self.finish.is_some() {
            self.complete(&mut out);
            return Ok(out);
        }
        Err(Error::Stream("stream ended before a finish reason".to_string()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Request body
// ────────────────────────────────────────────────────────────────────────────

fn content_json(content: &Content) -> Value {
    match content {
        Content::Text(text) => json!(text),
        Content::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({"type": "text", "text": text}),
                    ContentPart::Image { media_type, data } => json!({
                        "type": "image_url",
                        "image_url": {"url": format!("data:{media_type};base64,{data}")},
                    }),
                })
                .collect(),
        ),
    }
}

fn message_json(message: &Message) -> Value {
    match message.role {
        Role::User => json!({"role": "user", "content": content_json(&message.content)}),
        Role::Assistant if message.tool_calls.is_empty() => {
            json!({"role": "assistant", "content": content_json(&message.content)})
        }
        Role::Assistant => {
            let text = message.content.as_text();
            json!({
                "role": "assistant",
                "content": if text.is_empty() { Value::Null } else { json!(text) },
                "tool_calls": message.tool_calls.iter().map(|call| json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments},
                })).collect::<Vec<_>>(),
            })
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            "content": message.content.as_text(),
        }),
    }
}

fn build_body(backend: BackendId, request: &StreamRequest) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system_prompt {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.extend(request.messages.iter().map(message_json));

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": true,
        "stream_options": {"include_usage": true},
    });

    if let Some(max_tokens) = request.max_tokens {
        // OpenAI's reasoning models reject the legacy field.
        let field = if backend == BackendId::OpenAi {
            "max_completion_tokens"
        } else {
            "max_tokens"
        };
        body[field] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(level) = request.reasoning_level {
        body["reasoning_effort"] = json!(level.as_str());
    }
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(
            request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {"name": t.name, "description": t.description, "parameters": t.parameters},
                    })
                })
                .collect(),
        );
    }
    body
}

// ────────────────────────────────────────────────────────────────────────────
// OpenAiCompatProvider
// ────────────────────────────────────────────────────────────────────────────

/// Chat Completions provider for one OpenAI-compatible backend.
pub struct OpenAiCompatProvider {
    backend: BackendId,
    config: ProviderConfig,
    base_url: String,
    client: reqwest::Client,
    discovery: Option<CredentialResolver>,
}

impl OpenAiCompatProvider {
    pub fn new(backend: BackendId, config: ProviderConfig, base_url: impl Into<String>) -> Self {
        Self {
            backend,
            config,
            base_url: base_url.into(),
            client: http::client(),
            discovery: None,
        }
    }

    /// Fall back to an out-of-band token when none is configured.
    pub fn with_token_discovery(mut self, resolver: CredentialResolver) -> Self {
        self.discovery = Some(resolver);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn bearer(&self) -> Option<String> {
        self.config
            .api_key
            .as_ref()
            .filter(|k| !k.is_blank())
            .or(self.config.auth_token.as_ref().filter(|t| !t.is_blank()))
            .map(|s| s.expose_secret().to_string())
            .or_else(|| {
                self.discovery
                    .as_ref()
                    .and_then(|r| r.discover_token(self.backend))
            })
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(url).json(body);
        if let Some(token) = self.bearer() {
            builder = builder.bearer_auth(token);
        }
        if self.backend == BackendId::Copilot {
            builder = builder
                .header("Copilot-Integration-Id", COPILOT_INTEGRATION_ID)
                .header("Editor-Version", concat!("vibes/", env!("CARGO_PKG_VERSION")));
        }
        http::with_headers(builder, &self.config.headers)
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn backend(&self) -> BackendId {
        self.backend
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn is_available(&self) -> bool {
        if self.config.disabled {
            return false;
        }
        match auth_mode(self.backend) {
            AuthMode::BaseUrlOnly | AuthMode::EnvAuth => !self.base_url.is_empty(),
            AuthMode::ApiKey => self.config.api_key.as_ref().is_some_and(|k| !k.is_blank()),
            AuthMode::AuthOnly | AuthMode::ApiKeyOrAuth => self.bearer().is_some(),
        }
    }

    fn list_models(&self) -> Vec<ModelDef> {
        configured_models(self.backend, &self.config)
    }

    async fn stream_response(&self, request: StreamRequest) -> Result<ProviderStream> {
        let body = build_body(self.backend, &request);
        debug!(provider = %self.backend, model = %request.model, "starting stream");
        let response = http::send(self.request(&body)).await?;
        Ok(event_stream(
            response_bytes(response),
            Framing::Sse,
            ChatTranslator::default(),
            request.cancellation,
        ))
    }
}
