//! Request and event types shared by every provider.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message.
    User,
    /// Assistant response.
    Assistant,
    /// Tool/function result.
    Tool,
}

/// Content of a message, either text or structured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Simple text content.
    Text(String),
    /// Structured content parts (text, images, etc.).
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Create text content.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Get content as text, joining parts if necessary.
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// A part of structured content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content.
    Text { text: String },
    /// Base64-encoded image.
    Image { media_type: String, data: String },
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender.
    pub role: Role,
    /// Content of the message.
    pub content: Content,
    /// Tool calls made by the assistant in this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool call ID if this is a tool result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: Content) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<Content>) -> Self {
        Self::new(Role::User, content.into())
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    /// Create an assistant message that requested tool calls.
    pub fn assistant_tool_calls(content: impl Into<Content>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::new(Role::Assistant, content.into())
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<Content>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content.into())
        }
    }
}

/// Tool definition for function calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON schema for parameters.
    pub parameters: serde_json::Value,
}

/// A tool call made by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call.
    pub id: String,
    /// Name of the tool to call.
    pub name: String,
    /// Arguments as JSON string.
    pub arguments: String,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of input/prompt tokens.
    pub input_tokens: u64,
    /// Number of output/completion tokens.
    pub output_tokens: u64,
    /// Total tokens (input + output).
    pub total_tokens: u64,
}

impl Usage {
    /// Create new usage statistics.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// Reason why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Reached end of response naturally.
    EndTurn,
    /// Hit a stop sequence.
    StopSequence,
    /// Reached max tokens limit.
    MaxTokens,
    /// Model wants to call a tool.
    ToolUse,
}

/// How much effort reasoning models should spend thinking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningLevel {
    Low,
    Medium,
    High,
}

impl ReasoningLevel {
    /// Thinking token budget used by backends that take one.
    pub fn budget_tokens(self) -> u32 {
        match self {
            ReasoningLevel::Low => 1024,
            ReasoningLevel::Medium => 4096,
            ReasoningLevel::High => 16_384,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningLevel::Low => "low",
            ReasoningLevel::Medium => "medium",
            ReasoningLevel::High => "high",
        }
    }
}

/// A streaming completion request.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Model ID to use.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// System prompt, sent out of band from the messages.
    pub system_prompt: Option<String>,
    /// Available tools for function calling.
    pub tools: Vec<Tool>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Thinking effort for reasoning models.
    pub reasoning_level: Option<ReasoningLevel>,
    /// Cancelled by the caller to abort the stream.
    pub cancellation: CancellationToken,
}

impl StreamRequest {
    /// Create a new request.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            system_prompt: None,
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
            reasoning_level: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Set the system prompt.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set available tools.
    pub fn tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    /// Set the maximum tokens.
    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    /// Set the temperature.
    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    /// Set the reasoning level.
    pub fn reasoning(mut self, level: ReasoningLevel) -> Self {
        self.reasoning_level = Some(level);
        self
    }

    /// Use a caller-owned cancellation token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The same request aimed at a different model.
    pub fn for_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }
}

/// A normalized streaming event.
///
/// Every backend's wire protocol is translated into this one sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    ContentDelta { text: String },
    ThinkingDelta { text: String },
    ToolUseStart { id: String, name: String },
    ToolUseDelta { id: String, partial_json: String },
    ToolUseStop { id: String },
    UsageUpdate { usage: Usage },
    Complete { stop_reason: StopReason },
    Error { message: String },
}

impl ProviderEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self::ContentDelta { text: text.into() }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self::ThinkingDelta { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether the event carries model output.
    pub fn is_content_bearing(&self) -> bool {
        matches!(
            self,
            Self::ContentDelta { .. } | Self::ThinkingDelta { .. } | Self::ToolUseStart { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_work() {
        let user = Message::user("Hello");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.content.as_text(), "Hello");

        let asst = Message::assistant("Hi there!");
        assert_eq!(asst.role, Role::Assistant);

        let tool = Message::tool_result("call_123", "result");
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id, Some("call_123".to_string()));
    }

    #[test]
    fn stream_request_builder_works() {
        let req = StreamRequest::new("gpt-5", vec![Message::user("Hello")])
            .system_prompt("be brief")
            .temperature(0.7)
            .max_tokens(1000)
            .reasoning(ReasoningLevel::High);

        assert_eq!(req.model, "gpt-5");
        assert_eq!(req.system_prompt.as_deref(), Some("be brief"));
        assert_eq!(req.temperature, Some(0.7));
        assert_eq!(req.max_tokens, Some(1000));
        assert_eq!(req.reasoning_level, Some(ReasoningLevel::High));
    }

    #[test]
    fn for_model_shares_cancellation() {
        let req = StreamRequest::new("a", vec![Message::user("x")]);
        let retry = req.for_model("b");
        assert_eq!(retry.model, "b");
        req.cancellation.cancel();
        assert!(retry.cancellation.is_cancelled());
    }

    #[test]
    fn usage_calculates_total() {
        let usage = Usage::new(100, 50);
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn provider_event_wire_format() {
        let json = serde_json::to_string(&ProviderEvent::content("hi")).unwrap();
        assert_eq!(json, r#"{"type":"content_delta","text":"hi"}"#);

        let json = serde_json::to_string(&ProviderEvent::ToolUseDelta {
            id: "t1".into(),
            partial_json: "{\"a\"".into(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"tool_use_delta\""));

        let json = serde_json::to_string(&ProviderEvent::Complete {
            stop_reason: StopReason::EndTurn,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"complete","stop_reason":"end_turn"}"#);
    }

    #[test]
    fn content_bearing_events() {
        assert!(ProviderEvent::content("x").is_content_bearing());
        assert!(ProviderEvent::thinking("x").is_content_bearing());
        assert!(
            ProviderEvent::ToolUseStart {
                id: "1".into(),
                name: "read".into()
            }
            .is_content_bearing()
        );
        assert!(
            !ProviderEvent::ToolUseStop { id: "1".into() }.is_content_bearing()
        );
        assert!(
            !ProviderEvent::UsageUpdate {
                usage: Usage::new(1, 1)
            }
            .is_content_bearing()
        );
        assert!(!ProviderEvent::error("x").is_content_bearing());
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }

    #[test]
    fn content_parts_serialize_with_type_tag() {
        let parts = Content::Parts(vec![
            ContentPart::Text {
                text: "Hello".to_string(),
            },
            ContentPart::Image {
                media_type: "image/png".to_string(),
                data: "AAAA".to_string(),
            },
        ]);
        let json = serde_json::to_string(&parts).unwrap();
        assert!(json.contains("\"type\":\"text\""));
        assert!(json.contains("\"type\":\"image\""));
        assert_eq!(parts.as_text(), "Hello");
    }
}
