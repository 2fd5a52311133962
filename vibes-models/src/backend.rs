//! Backend identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// One independently-operated language-model service.
///
/// The declaration order is the registration order: when an unknown model id
/// is routed by scanning backends, earlier variants win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendId {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Google,
    Groq,
    Mistral,
    #[serde(rename = "deepseek")]
    DeepSeek,
    Xai,
    #[serde(rename = "openrouter")]
    OpenRouter,
    Copilot,
    ClaudeCode,
    Ollama,
    #[serde(rename = "lmstudio")]
    LmStudio,
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
}

impl BackendId {
    /// Every backend, in registration order.
    pub const ALL: [BackendId; 13] = [
        BackendId::Anthropic,
        BackendId::OpenAi,
        BackendId::Google,
        BackendId::Groq,
        BackendId::Mistral,
        BackendId::DeepSeek,
        BackendId::Xai,
        BackendId::OpenRouter,
        BackendId::Copilot,
        BackendId::ClaudeCode,
        BackendId::Ollama,
        BackendId::LmStudio,
        BackendId::OpenAiCompatible,
    ];

    /// Stable string identifier, as used in config files and on the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            BackendId::Anthropic => "anthropic",
            BackendId::OpenAi => "openai",
            BackendId::Google => "google",
            BackendId::Groq => "groq",
            BackendId::Mistral => "mistral",
            BackendId::DeepSeek => "deepseek",
            BackendId::Xai => "xai",
            BackendId::OpenRouter => "openrouter",
            BackendId::Copilot => "copilot",
            BackendId::ClaudeCode => "claude-code",
            BackendId::Ollama => "ollama",
            BackendId::LmStudio => "lmstudio",
            BackendId::OpenAiCompatible => "openai-compatible",
        }
    }

    /// Whether the backend runs on the local machine.
    pub fn is_local(self) -> bool {
        matches!(
            self,
            BackendId::ClaudeCode | BackendId::Ollama | BackendId::LmStudio
        )
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        BackendId::ALL
            .into_iter()
            .find(|b| b.as_str() == needle)
            .ok_or_else(|| Error::UnknownBackend(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_str_round_trips_through_from_str() {
        for backend in BackendId::ALL {
            assert_eq!(backend.as_str().parse::<BackendId>().unwrap(), backend);
        }
    }

    #[test]
    fn from_str_is_case_insensitive() {
        assert_eq!("OpenAI".parse::<BackendId>().unwrap(), BackendId::OpenAi);
        assert_eq!(" claude-code ".parse::<BackendId>().unwrap(), BackendId::ClaudeCode);
    }

    #[test]
    fn from_str_rejects_unknown() {
        let err = "cohere".parse::<BackendId>().unwrap_err();
        assert_eq!(err.to_string(), "unknown backend: cohere");
    }

    #[test]
    fn serde_matches_as_str() {
        for backend in BackendId::ALL {
            let json = serde_json::to_string(&backend).unwrap();
            assert_eq!(json, format!("\"{}\"", backend.as_str()));
        }
    }

    #[test]
    fn all_is_in_declaration_order() {
        let mut sorted = BackendId::ALL;
        sorted.sort();
        assert_eq!(sorted, BackendId::ALL);
    }
}
