//! Anthropic Messages API provider.
//!
//! Streams `POST /v1/messages` as server-sent events. The event translator is
//! also used for the Claude Code CLI, which wraps the same events.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::framing::{EventTranslator, Frame, Framing, event_stream, response_bytes};
use super::{
    Content, ContentPart, Message, Provider, ProviderEvent, ProviderStream, Role, StopReason,
    StreamRequest, Usage, configured_models, http,
};
use crate::{BackendId, Error, ModelDef, ProviderConfig, Result};

const API_VERSION: &str = "2023-06-01";
const OAUTH_BETA: &str = "oauth-2025-04-20";
const DEFAULT_MAX_TOKENS: u32 = 8192;

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum StreamEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<OutputUsage>,
    },
    MessageStop,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageStart {
    #[serde(default)]
    usage: Option<InputUsage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InputUsage {
    #[serde(default)]
    input_tokens: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OutputUsage {
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum BlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    #[serde(default)]
    message: String,
}

pub(crate) fn map_stop_reason(reason: &str) -> StopReason {
    match reason {
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        "tool_use" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Translator
// ────────────────────────────────────────────────────────────────────────────

/// Translates Anthropic stream events into [`ProviderEvent`]s.
#[derive(Debug, Default)]
pub(crate) struct AnthropicTranslator {
    input_tokens: u64,
    tool_blocks: HashMap<usize, String>,
    stop_reason: Option<StopReason>,
    completed: bool,
}

impl AnthropicTranslator {
    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn apply(&mut self, event: StreamEvent) -> Result<Vec<ProviderEvent>> {
        let mut out = Vec::new();
        match event {
            StreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.input_tokens = usage.input_tokens;
                }
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::ToolUse { id, name } => {
                    self.tool_blocks.insert(index, id.clone());
                    out.push(ProviderEvent::ToolUseStart { id, name });
                }
                ContentBlock::Text { text } if !text.is_empty() => {
                    out.push(ProviderEvent::content(text));
                }
                _ => {}
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } if !text.is_empty() => {
                    out.push(ProviderEvent::content(text));
                }
                BlockDelta::ThinkingDelta { thinking } if !thinking.is_empty() => {
                    out.push(ProviderEvent::thinking(thinking));
                }
                BlockDelta::InputJsonDelta { partial_json } if !partial_json.is_empty() => {
                    if let Some(id) = self.tool_blocks.get(&index) {
                        out.push(ProviderEvent::ToolUseDelta {
                            id: id.clone(),
                            partial_json,
                        });
                    }
                }
                _ => {}
            },
            StreamEvent::ContentBlockStop { index } => {
                if let Some(id) = self.tool_blocks.remove(&index) {
                    out.push(ProviderEvent::ToolUseStop { id });
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason.as_deref() {
                    self.stop_reason = Some(map_stop_reason(reason));
                }
                if let Some(usage) = usage {
                    out.push(ProviderEvent::UsageUpdate {
                        usage: Usage::new(self.input_tokens, usage.output_tokens),
                    });
                }
            }
            StreamEvent::MessageStop => {
                self.completed = true;
                out.push(ProviderEvent::Complete {
                    stop_reason: self.stop_reason.unwrap_or(StopReason::EndTurn),
                });
            }
            StreamEvent::Error { error } => {
                let message = if error.message.is_empty() {
                    "anthropic stream returned an error event".to_string()
                } else {
                    error.message
                };
                return Err(Error::Stream(message));
            }
            StreamEvent::Other => {}
        }
        Ok(out)
    }
}

impl EventTranslator for AnthropicTranslator {
    fn translate(&mut self, frame: Frame) -> Result<Vec<ProviderEvent>> {
        if frame.data.is_empty() {
            return Ok(Vec::new());
        }
        let event: StreamEvent = serde_json::from_str(&frame.data)?;
        self.apply(event)
    }

    fn finish(&mut self) -> Result<Vec<ProviderEvent>> {
        if self.completed {
            Ok(Vec::new())
        } else {
            Err(Error::Stream(
                "anthropic stream ended before message_stop".to_string(),
            ))
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Request body
// ────────────────────────────────────────────────────────────────────────────

fn content_blocks(content: &Content) -> Value {
    match content {
        Content::Text(text) => json!(text),
        Content::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({"type": "text", "text": text}),
                    ContentPart::Image { media_type, data } => json!({
                        "type": "image",
                        "source": {"type": "base64", "media_type": media_type, "data": data},
                    }),
                })
                .collect(),
        ),
    }
}

fn message_json(message: &Message) -> Value {
    match message.role {
        Role::User => json!({"role": "user", "content": content_blocks(&message.content)}),
        Role::Assistant if message.tool_calls.is_empty() => {
            json!({"role": "assistant", "content": content_blocks(&message.content)})
        }
        Role::Assistant => {
            let mut blocks = Vec::new();
            let text = message.content.as_text();
            if !text.is_empty() {
                blocks.push(json!({"type": "text", "text": text}));
            }
            for call in &message.tool_calls {
                let input: Value =
                    serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": input,
                }));
            }
            json!({"role": "assistant", "content": blocks})
        }
        Role::Tool => json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                "content": message.content.as_text(),
            }],
        }),
    }
}

pub(crate) fn build_body(request: &StreamRequest) -> Value {
    let mut max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    let mut body = json!({
        "model": request.model,
        "messages": request.messages.iter().map(message_json).collect::<Vec<_>>(),
        "stream": true,
    });

    if let Some(system) = &request.system_prompt {
        body["system"] = json!(system);
    }
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(
            request
                .tools
                .iter()
                .map(|t| json!({"name": t.name, "description": t.description, "input_schema": t.parameters}))
                .collect(),
        );
    }
    match request.reasoning_level {
        Some(level) => {
            let budget = level.budget_tokens();
            max_tokens = max_tokens.max(budget + 1024);
            body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
        }
        None => {
            if let Some(temperature) = request.temperature {
                body["temperature"] = json!(temperature);
            }
        }
    }
    body["max_tokens"] = json!(max_tokens);
    body
}

// ────────────────────────────────────────────────────────────────────────────
// AnthropicProvider
// ────────────────────────────────────────────────────────────────────────────

/// Anthropic Messages API provider.
///
/// Authenticates with `x-api-key` when an API key is configured, otherwise
/// with a bearer token and the OAuth beta header.
pub struct AnthropicProvider {
    config: ProviderConfig,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig, base_url: impl Into<String>) -> Self {
        Self {
            config,
            base_url: base_url.into(),
            client: http::client(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/messages", self.base_url);
        let mut builder = self
            .client
            .post(url)
            .header("anthropic-version", API_VERSION)
            .json(body);
        if let Some(key) = self.config.api_key.as_ref().filter(|k| !k.is_blank()) {
            builder = builder.header("x-api-key", key.expose_secret());
        } else if let Some(token) = &self.config.auth_token {
            builder = builder
                .bearer_auth(token.expose_secret())
                .header("anthropic-beta", OAUTH_BETA);
        }
        http::with_headers(builder, &self.config.headers)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn backend(&self) -> BackendId {
        BackendId::Anthropic
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn is_available(&self) -> bool {
        !self.config.disabled
            && (self.config.api_key.as_ref().is_some_and(|k| !k.is_blank())
                || self.config.auth_token.as_ref().is_some_and(|t| !t.is_blank()))
    }

    fn list_models(&self) -> Vec<ModelDef> {
        configured_models(BackendId::Anthropic, &self.config)
    }

    async fn stream_response(&self, request: StreamRequest) -> Result<ProviderStream> {
        let body = build_body(&request);
        debug!(provider = "anthropic", model = %request.model, "starting stream");
        let response = http::send(self.request(&body)).await?;
        Ok(event_stream(
            response_bytes(response),
            Framing::Sse,
            AnthropicTranslator::default(),
            request.cancellation,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ReasoningLevel, Tool, ToolCall};

    fn frame(data: &str) -> Frame {
        Frame {
            event: None,
            data: data.to_string(),
        }
    }

    fn run(lines: &[&str]) -> Result<Vec<ProviderEvent>> {
        let mut t = AnthropicTranslator::default();
        let mut out = Vec::new();
        for line in lines {
            out.extend(t.translate(frame(line))?);
        }
        out.extend(t.finish()?);
        Ok(out)
    }

    #[test]
    fn text_stream_normalizes() {
        let events = run(&[
            r#"{"type":"message_start","message":{"id":"m","usage":{"input_tokens":12,"output_tokens":1}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"ping"}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}"#,
            r#"{"type":"message_stop"}"#,
        ])
        .unwrap();

        assert_eq!(
            events,
            vec![
                ProviderEvent::content("Hel"),
                ProviderEvent::content("lo"),
                ProviderEvent::UsageUpdate {
                    usage: Usage::new(12, 3)
                },
                ProviderEvent::Complete {
                    stop_reason: StopReason::EndTurn
                },
            ]
        );
    }

    #[test]
    fn thinking_and_tool_use() {
        let events = run(&[
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hmm"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"signature_delta","signature":"abc"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"read","input":{}}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"path\":"}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"a\"}"}}"#,
            r#"{"type":"content_block_stop","index":1}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"}}"#,
            r#"{"type":"message_stop"}"#,
        ])
        .unwrap();

        assert_eq!(events[0], ProviderEvent::thinking("hmm"));
        assert_eq!(
            events[1],
            ProviderEvent::ToolUseStart {
                id: "toolu_1".into(),
                name: "read".into()
            }
        );
        assert_eq!(
            events[2],
            ProviderEvent::ToolUseDelta {
                id: "toolu_1".into(),
                partial_json: "{\"path\":".into()
            }
        );
        assert_eq!(events[4], ProviderEvent::ToolUseStop { id: "toolu_1".into() });
        assert_eq!(
            events[5],
            ProviderEvent::Complete {
                stop_reason: StopReason::ToolUse
            }
        );
    }

    #[test]
    fn error_event_fails_stream() {
        let err = run(&[r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#])
            .unwrap_err();
        assert_eq!(err.to_string(), "stream error: Overloaded");
    }

    #[test]
    fn truncated_stream_fails() {
        let err = run(&[
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"partial"}}"#,
        ])
        .unwrap_err();
        assert!(err.to_string().contains("message_stop"));
    }

    #[test]
    fn body_includes_system_tools_and_thinking() {
        let request = StreamRequest::new(
            "claude-sonnet-4-5",
            vec![
                Message::user("read it"),
                Message::assistant_tool_calls(
                    "",
                    vec![ToolCall {
                        id: "toolu_1".into(),
                        name: "read".into(),
                        arguments: "{\"path\":\"a\"}".into(),
                    }],
                ),
                Message::tool_result("toolu_1", "contents"),
            ],
        )
        .system_prompt("be brief")
        .temperature(0.2)
        .reasoning(ReasoningLevel::Medium)
        .tools(vec![Tool {
            name: "read".into(),
            description: "Read a file".into(),
            parameters: json!({"type": "object"}),
        }]);

        let body = build_body(&request);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["stream"], true);
        assert_eq!(body["thinking"]["budget_tokens"], 4096);
        assert!(body.get("temperature").is_none());
        assert_eq!(body["max_tokens"], 8192);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["messages"][1]["content"][0]["type"], "tool_use");
        assert_eq!(body["messages"][1]["content"][0]["input"]["path"], "a");
        assert_eq!(body["messages"][2]["role"], "user");
        assert_eq!(body["messages"][2]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn availability_needs_key_or_token() {
        let base = ProviderConfig::new(BackendId::Anthropic);
        assert!(!AnthropicProvider::new(base.clone(), "https://x").is_available());
        assert!(
            AnthropicProvider::new(base.clone().with_auth_token("oauth"), "https://x")
                .is_available()
        );
        let mut disabled = base.with_api_key("sk");
        disabled.disabled = true;
        assert!(!AnthropicProvider::new(disabled, "https://x").is_available());
    }
}
