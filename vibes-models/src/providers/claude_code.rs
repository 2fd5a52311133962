//! Claude Code CLI provider.
//!
//! Runs the locally installed `claude` executable in print mode and reads its
//! `stream-json` output. Partial messages wrap ordinary Anthropic stream
//! events; the final `result` line ends the turn.

use std::process::Stdio;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::anthropic::{AnthropicTranslator, StreamEvent};
use super::framing::{ByteStream, EventTranslator, Frame, Framing, event_stream};
use super::{
    Message, Provider, ProviderEvent, ProviderStream, Role, StopReason, StreamRequest, Usage,
    configured_models,
};
use crate::auth::{CLAUDE_CODE_COMMAND, CredentialResolver};
use crate::{BackendId, Error, ModelDef, ProviderConfig, Result};

const MODEL_PREFIX: &str = "claude-code-";

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CliLine {
    StreamEvent {
        event: Value,
    },
    Assistant {
        message: AssistantMessage,
    },
    Result {
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        usage: Option<ResultUsage>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ResultUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// `stream-json` lines to [`ProviderEvent`]s.
///
/// The CLI may run several assistant messages in one turn, so completion is
/// taken from the `result` line rather than the inner `message_stop`.
#[derive(Debug, Default)]
struct CliTranslator {
    inner: AnthropicTranslator,
    saw_delta: bool,
    stop_reason: Option<StopReason>,
    done: bool,
}

impl EventTranslator for CliTranslator {
    fn translate(&mut self, frame: Frame) -> Result<Vec<ProviderEvent>> {
        let line: CliLine = serde_json::from_str(&frame.data)?;
        let mut out = Vec::new();
        match line {
            CliLine::StreamEvent { event } => {
                let event: StreamEvent = serde_json::from_value(event)?;
                for event in self.inner.apply(event)? {
                    match event {
                        ProviderEvent::Complete { stop_reason } => {
                            self.stop_reason = Some(stop_reason);
                        }
                        // Usage is reported once, from the result line.
                        ProviderEvent::UsageUpdate { .. } => {}
                        event => {
                            self.saw_delta |= event.is_content_bearing();
                            out.push(event);
                        }
                    }
                }
            }
            CliLine::Assistant { message } if !self.saw_delta => {
                // Older CLIs only emit whole messages.
                for block in message.content {
                    if let Some(text) = block.get("text").and_then(Value::as_str)
                        && !text.is_empty()
                    {
                        out.push(ProviderEvent::content(text));
                    }
                }
            }
            CliLine::Assistant { .. } | CliLine::Other => {}
            CliLine::Result {
                is_error,
                subtype,
                result,
                usage,
            } => {
                if is_error {
                    let message = result
                        .filter(|r| !r.is_empty())
                        .or(subtype)
                        .unwrap_or_else(|| "claude CLI reported an error".to_string());
                    return Err(Error::Stream(message));
                }
                self.done = true;
                if let Some(usage) = usage {
                    out.push(ProviderEvent::UsageUpdate {
                        usage: Usage::new(usage.input_tokens, usage.output_tokens),
                    });
                }
                out.push(ProviderEvent::Complete {
                    stop_reason: self.stop_reason.unwrap_or(StopReason::EndTurn),
                });
            }
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<ProviderEvent>> {
        if self.done {
            Ok(Vec::new())
        } else {
            Err(Error::Stream(
                "claude CLI exited without a result".to_string(),
            ))
        }
    }
}

/// CLI model alias for a catalog id (`claude-code-sonnet` -> `sonnet`).
fn cli_model(model_id: &str) -> &str {
    model_id.strip_prefix(MODEL_PREFIX).unwrap_or(model_id)
}

/// The conversation as one prompt. Earlier turns are labelled so the CLI sees
/// the history; a single user message is sent as-is.
fn render_prompt(messages: &[Message]) -> String {
    if let [only] = messages
        && only.role == Role::User
    {
        return only.content.as_text();
    }
    messages
        .iter()
        .map(|m| {
            let label = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool result",
            };
            format!("{label}: {}", m.content.as_text())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Provider backed by the local Claude Code CLI.
pub struct ClaudeCodeProvider {
    config: ProviderConfig,
    resolver: CredentialResolver,
    command: String,
}

impl ClaudeCodeProvider {
    pub fn new(config: ProviderConfig, resolver: CredentialResolver) -> Self {
        Self {
            config,
            resolver,
            command: CLAUDE_CODE_COMMAND.to_string(),
        }
    }

    fn command(&self, request: &StreamRequest) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args([
            "-p",
            "--verbose",
            "--output-format",
            "stream-json",
            "--include-partial-messages",
            "--model",
            cli_model(&request.model),
        ]);
        if let Some(system) = &request.system_prompt {
            cmd.args(["--append-system-prompt", system.as_str()]);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Provider for ClaudeCodeProvider {
    fn backend(&self) -> BackendId {
        BackendId::ClaudeCode
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn is_available(&self) -> bool {
        !self.config.disabled && self.resolver.has_host_credentials(BackendId::ClaudeCode)
    }

    fn list_models(&self) -> Vec<ModelDef> {
        configured_models(BackendId::ClaudeCode, &self.config)
    }

    async fn stream_response(&self, request: StreamRequest) -> Result<ProviderStream> {
        debug!(provider = "claude-code", model = %request.model, "spawning CLI");
        let mut child = self.command(&request).spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(render_prompt(&request.messages).as_bytes())
                .await?;
            stdin.shutdown().await?;
        }
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Stream("claude CLI stdout unavailable".to_string()))?;

        // The stream owns the child; dropping it kills the process.
        let bytes: ByteStream = Box::pin(ReaderStream::new(stdout).map(move |chunk| {
            let _child = &child;
            chunk.map(|b| b.to_vec()).map_err(Error::from)
        }));

        Ok(event_stream(
            bytes,
            Framing::JsonLines,
            CliTranslator::default(),
            request.cancellation,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::MapEnv;

    fn run(lines: &[&str]) -> Result<Vec<ProviderEvent>> {
        let mut t = CliTranslator::default();
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
    fn partial_messages_then_result() {
        let events = run(&[
            r#"{"type":"system","subtype":"init","session_id":"s"}"#,
            r#"{"type":"stream_event","event":{"type":"message_start","message":{"usage":{"input_tokens":3}}}}"#,
            r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}}"#,
            r#"{"type":"stream_event","event":{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":1}}}"#,
            r#"{"type":"stream_event","event":{"type":"message_stop"}}"#,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hi"}]}}"#,
            r#"{"type":"result","subtype":"success","is_error":false,"result":"Hi","usage":{"input_tokens":3,"output_tokens":1}}"#,
        ])
        .unwrap();

        assert_eq!(
            events,
            vec![
                ProviderEvent::content("Hi"),
                ProviderEvent::UsageUpdate {
                    usage: Usage::new(3, 1)
                },
                ProviderEvent::Complete {
                    stop_reason: StopReason::EndTurn
                },
            ]
        );
    }

    #[test]
    fn whole_assistant_message_without_partials() {
        let events = run(&[
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello"}]}}"#,
            r#"{"type":"result","subtype":"success","is_error":false}"#,
        ])
        .unwrap();
        assert_eq!(events[0], ProviderEvent::content("Hello"));
    }

    #[test]
    fn error_result_fails() {
        let err = run(&[r#"{"type":"result","subtype":"error_during_execution","is_error":true}"#])
            .unwrap_err();
        assert!(err.to_string().contains("error_during_execution"));
    }

    #[test]
    fn exit_without_result_fails() {
        assert!(run(&[r#"{"type":"system","subtype":"init"}"#]).is_err());
    }

    #[test]
    fn model_alias_and_prompt() {
        assert_eq!(cli_model("claude-code-opus"), "opus");
        assert_eq!(cli_model("sonnet"), "sonnet");

        assert_eq!(render_prompt(&[Message::user("hi")]), "hi");
        let prompt = render_prompt(&[
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("again"),
        ]);
        assert_eq!(prompt, "User: hi\n\nAssistant: hello\n\nUser: again");
    }

    #[test]
    fn availability_checks_cli_on_call() {
        let config = ProviderConfig::new(BackendId::ClaudeCode);
        let missing = ClaudeCodeProvider::new(
            config.clone(),
            CredentialResolver::new(Arc::new(MapEnv::new())),
        );
        assert!(!missing.is_available());

        let present = ClaudeCodeProvider::new(
            config,
            CredentialResolver::new(Arc::new(MapEnv::new().with_command("claude"))),
        );
        assert!(present.is_available());
        assert_eq!(
            present.list_models().len(),
            2,
            "both claude-code catalog models"
        );
    }
}
