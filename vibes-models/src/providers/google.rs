//! Google Gemini provider (`streamGenerateContent`, SSE).

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

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    thoughts_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    #[serde(default)]
    message: String,
}

/// Gemini chunks to [`ProviderEvent`]s. Function calls arrive whole, so each
/// one becomes a start, a single delta and a stop.
#[derive(Debug, Default)]
struct GeminiTranslator {
    calls: usize,
    usage: Option<UsageMetadata>,
    finish: Option<StopReason>,
}

impl EventTranslator for GeminiTranslator {
    fn translate(&mut self, frame: Frame) -> Result<Vec<ProviderEvent>> {
        let mut out = Vec::new();
        if frame.data.trim().is_empty() {
            return Ok(out);
        }
        let chunk: GenerateChunk = serde_json::from_str(&frame.data)?;
        if let Some(error) = chunk.error {
            return Err(Error::Stream(error.message));
        }
        if let Some(usage) = chunk.usage_metadata {
            self.usage = Some(usage);
        }

        for candidate in chunk.candidates {
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if let Some(call) = part.function_call {
                    self.calls += 1;
                    let id = call
                        .id
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(|| format!("call_{}", self.calls));
                    out.push(ProviderEvent::ToolUseStart {
                        id: id.clone(),
                        name: call.name,
                    });
                    out.push(ProviderEvent::ToolUseDelta {
                        id: id.clone(),
                        partial_json: call.args.to_string(),
                    });
                    out.push(ProviderEvent::ToolUseStop { id });
                    continue;
                }
                match part.text.filter(|t| !t.is_empty()) {
                    Some(text) if part.thought => out.push(ProviderEvent::thinking(text)),
                    Some(text) => out.push(ProviderEvent::content(text)),
                    None => {}
                }
            }
            if let Some(reason) = candidate.finish_reason.as_deref() {
                self.finish = Some(match reason {
                    "MAX_TOKENS" => StopReason::MaxTokens,
                    _ if self.calls > 0 => StopReason::ToolUse,
                    _ => StopReason::EndTurn,
                });
            }
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<ProviderEvent>> {
        let Some(stop_reason) = self.finish else {
            return Err(Error::Stream(
                "gemini stream ended without a finish reason".to_string(),
            ));
        };
        let mut out = Vec::new();
        if let Some(usage) = self.usage {
            out.push(ProviderEvent::UsageUpdate {
                usage: Usage::new(
                    usage.prompt_token_count,
                    usage.candidates_token_count + usage.thoughts_token_count,
                ),
            });
        }
        out.push(ProviderEvent::Complete { stop_reason });
        Ok(out)
    }
}

fn parts_json(content: &Content) -> Vec<Value> {
    match content {
        Content::Text(text) => vec![json!({"text": text})],
        Content::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => json!({"text": text}),
                ContentPart::Image { media_type, data } => {
                    json!({"inlineData": {"mimeType": media_type, "data": data}})
                }
            })
            .collect(),
    }
}

fn build_body(request: &StreamRequest) -> Value {
    // Gemini keys function responses by tool name rather than call id.
    let tool_names: HashMap<&str, &str> = request
        .messages
        .iter()
        .flat_map(|m| m.tool_calls.iter())
        .map(|c| (c.id.as_str(), c.name.as_str()))
        .collect();

    let contents: Vec<Value> = request
        .messages
        .iter()
        .map(|message: &Message| match message.role {
            Role::User => json!({"role": "user", "parts": parts_json(&message.content)}),
            Role::Assistant => {
                let mut parts = Vec::new();
                let text = message.content.as_text();
                if !text.is_empty() {
                    parts.push(json!({"text": text}));
                }
                for call in &message.tool_calls {
                    let args: Value =
                        serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));
                    parts.push(json!({"functionCall": {"name": call.name, "args": args}}));
                }
                json!({"role": "model", "parts": parts})
            }
            Role::Tool => {
                let id = message.tool_call_id.as_deref().unwrap_or_default();
                let name = tool_names.get(id).copied().unwrap_or(id);
                json!({
                    "role": "user",
                    "parts": [{"functionResponse": {
                        "name": name,
                        "response": {"content": message.content.as_text()},
                    }}],
                })
            }
        })
        .collect();

    let mut body = json!({"contents": contents});
    if let Some(system) = &request.system_prompt {
        body["systemInstruction"] = json!({"parts": [{"text": system}]});
    }
    if !request.tools.is_empty() {
        body["tools"] = json!([{
            "functionDeclarations": request.tools.iter().map(|t| json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters,
            })).collect::<Vec<_>>(),
        }]);
    }

    let mut generation = serde_json::Map::new();
    if let Some(max_tokens) = request.max_tokens {
        generation.insert("maxOutputTokens".into(), json!(max_tokens));
    }
    if let Some(temperature) = request.temperature {
        generation.insert("temperature".into(), json!(temperature));
    }
    if let Some(level) = request.reasoning_level {
        generation.insert(
            "thinkingConfig".into(),
            json!({"thinkingBudget": level.budget_tokens(), "includeThoughts": true}),
        );
    }
    if !generation.is_empty() {
        body["generationConfig"] = Value::Object(generation);
    }
    body
}

/// Google Gemini provider.
pub struct GoogleProvider {
    config: ProviderConfig,
    base_url: String,
    client: reqwest::Client,
}

impl GoogleProvider {
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
}

#[async_trait]
impl Provider for GoogleProvider {
    fn backend(&self) -> BackendId {
        BackendId::Google
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn is_available(&self) -> bool {
        !self.config.disabled && self.config.api_key.as_ref().is_some_and(|k| !k.is_blank())
    }

    fn list_models(&self) -> Vec<ModelDef> {
        configured_models(BackendId::Google, &self.config)
    }

    async fn stream_response(&self, request: StreamRequest) -> Result<ProviderStream> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, request.model
        );
        let mut builder = self.client.post(url).json(&build_body(&request));
        if let Some(key) = &self.config.api_key {
            builder = builder.header("x-goog-api-key", key.expose_secret());
        }
        builder = http::with_headers(builder, &self.config.headers);

        debug!(provider = "google", model = %request.model, "starting stream");
        let response = http::send(builder).await?;
        Ok(event_stream(
            response_bytes(response),
            Framing::Sse,
            GeminiTranslator::default(),
            request.cancellation,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ReasoningLevel, ToolCall};

    fn run(lines: &[&str]) -> Result<Vec<ProviderEvent>> {
        let mut t = GeminiTranslator::default();
        let mut out = Vec::new();
        for line in lines {
            out.extend(t.translate(Frame {
                event: None,
                data: line.to_string(),
            })?);
        }
        out.extend(t.finish()?);
        Ok(out)
    }

    #[test]
    fn text_thoughts_and_usage() {
        let events = run(&[
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"plan","thought":true}]}}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello"}]}}],"usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":1}}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":"!"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":2,"thoughtsTokenCount":3}}"#,
        ])
        .unwrap();
        assert_eq!(
            events,
            vec![
                ProviderEvent::thinking("plan"),
                ProviderEvent::content("Hello"),
                ProviderEvent::content("!"),
                ProviderEvent::UsageUpdate {
                    usage: Usage::new(4, 5)
                },
                ProviderEvent::Complete {
                    stop_reason: StopReason::EndTurn
                },
            ]
        );
    }

    #[test]
    fn function_call_is_whole() {
        let events = run(&[
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"read","args":{"path":"a"}}}]},"finishReason":"STOP"}]}"#,
        ])
        .unwrap();
        assert_eq!(
            events[0],
            ProviderEvent::ToolUseStart {
                id: "call_1".into(),
                name: "read".into()
            }
        );
        assert_eq!(
            events[1],
            ProviderEvent::ToolUseDelta {
                id: "call_1".into(),
                partial_json: r#"{"path":"a"}"#.into()
            }
        );
        assert_eq!(events[2], ProviderEvent::ToolUseStop { id: "call_1".into() });
        assert_eq!(
            events[3],
            ProviderEvent::Complete {
                stop_reason: StopReason::ToolUse
            }
        );
    }

    #[test]
    fn stream_without_finish_reason_fails() {
        assert!(run(&[r#"{"candidates":[{"content":{"parts":[{"text":"x"}]}}]}"#]).is_err());
    }

    #[test]
    fn body_maps_roles_and_tool_results() {
        let request = StreamRequest::new(
            "gemini-2.5-pro",
            vec![
                Message::user("hi"),
                Message::assistant_tool_calls(
                    "",
                    vec![ToolCall {
                        id: "call_1".into(),
                        name: "read".into(),
                        arguments: r#"{"path":"a"}"#.into(),
                    }],
                ),
                Message::tool_result("call_1", "data"),
            ],
        )
        .system_prompt("sys")
        .reasoning(ReasoningLevel::High);

        let body = build_body(&request);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][1]["parts"][0]["functionCall"]["args"]["path"], "a");
        assert_eq!(body["contents"][2]["parts"][0]["functionResponse"]["name"], "read");
        assert_eq!(
            body["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            16_384
        );
    }
}
