//! Static authentication policy per backend.
//!
//! Each backend has exactly one [`AuthMode`] and a fixed, ordered list of
//! environment variables per credential kind. The first non-empty variable
//! wins.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::BackendId;

/// How a backend authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Requires an API key.
    ApiKey,
    /// Requires a bearer/OAuth token.
    AuthOnly,
    /// Accepts either an API key or a token.
    ApiKeyOrAuth,
    /// Authenticates through the host environment (an installed, logged-in CLI).
    EnvAuth,
    /// Only needs an endpoint.
    BaseUrlOnly,
}

impl AuthMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMode::ApiKey => "api_key",
            AuthMode::AuthOnly => "auth_only",
            AuthMode::ApiKeyOrAuth => "api_key_or_auth",
            AuthMode::EnvAuth => "env_auth",
            AuthMode::BaseUrlOnly => "base_url_only",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of credential an environment variable supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    ApiKey,
    AuthToken,
    BaseUrl,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 3] = [
        CredentialKind::ApiKey,
        CredentialKind::AuthToken,
        CredentialKind::BaseUrl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CredentialKind::ApiKey => "apiKey",
            CredentialKind::AuthToken => "authToken",
            CredentialKind::BaseUrl => "baseUrl",
        }
    }
}

/// Policy row for one backend.
#[derive(Debug, Clone, Copy)]
pub struct BackendPolicy {
    pub mode: AuthMode,
    pub api_key_env: &'static [&'static str],
    pub auth_token_env: &'static [&'static str],
    pub base_url_env: &'static [&'static str],
    pub default_base_url: Option<&'static str>,
}

const NONE: &[&str] = &[];

const fn row(
    mode: AuthMode,
    api_key_env: &'static [&'static str],
    auth_token_env: &'static [&'static str],
    base_url_env: &'static [&'static str],
    default_base_url: Option<&'static str>,
) -> BackendPolicy {
    BackendPolicy {
        mode,
        api_key_env,
        auth_token_env,
        base_url_env,
        default_base_url,
    }
}

/// Policy for a backend.
pub const fn policy(backend: BackendId) -> BackendPolicy {
    use AuthMode::*;
    match backend {
        BackendId::Anthropic => row(
            ApiKeyOrAuth,
            &["ANTHROPIC_API_KEY"],
            &["ANTHROPIC_AUTH_TOKEN", "CLAUDE_CODE_OAUTH_TOKEN"],
            &["ANTHROPIC_BASE_URL"],
            Some("https://api.anthropic.com"),
        ),
        BackendId::OpenAi => row(
            ApiKey,
            &["OPENAI_API_KEY"],
            NONE,
            &["OPENAI_BASE_URL"],
            Some("https://api.openai.com/v1"),
        ),
        BackendId::Google => row(
            ApiKey,
            &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
            NONE,
            &["GEMINI_BASE_URL"],
            Some("https://generativelanguage.googleapis.com/v1beta"),
        ),
        BackendId::Groq => row(
            ApiKey,
            &["GROQ_API_KEY"],
            NONE,
            NONE,
            Some("https://api.groq.com/openai/v1"),
        ),
        BackendId::Mistral => row(
            ApiKey,
            &["MISTRAL_API_KEY"],
            NONE,
            NONE,
            Some("https://api.mistral.ai/v1"),
        ),
        BackendId::DeepSeek => row(
            ApiKey,
            &["DEEPSEEK_API_KEY"],
            NONE,
            NONE,
            Some("https://api.deepseek.com/v1"),
        ),
        BackendId::Xai => row(
            ApiKey,
            &["XAI_API_KEY", "GROK_API_KEY"],
            NONE,
            NONE,
            Some("https://api.x.ai/v1"),
        ),
        BackendId::OpenRouter => row(
            ApiKey,
            &["OPENROUTER_API_KEY"],
            NONE,
            NONE,
            Some("https://openrouter.ai/api/v1"),
        ),
        BackendId::Copilot => row(
            AuthOnly,
            NONE,
            &["COPILOT_GITHUB_TOKEN", "GH_COPILOT_TOKEN"],
            NONE,
            Some("https://api.githubcopilot.com"),
        ),
        BackendId::ClaudeCode => row(EnvAuth, NONE, NONE, NONE, None),
        BackendId::Ollama => row(
            BaseUrlOnly,
            NONE,
            NONE,
            &["OLLAMA_HOST"],
            Some("http://localhost:11434"),
        ),
        BackendId::LmStudio => row(
            BaseUrlOnly,
            NONE,
            NONE,
            &["LMSTUDIO_BASE_URL"],
            Some("http://localhost:1234/v1"),
        ),
        BackendId::OpenAiCompatible => row(
            BaseUrlOnly,
            &["OPENAI_COMPATIBLE_API_KEY"],
            NONE,
            &["OPENAI_COMPATIBLE_BASE_URL"],
            None,
        ),
    }
}

/// Backends whose authentication is discovered lazily, out of band.
///
/// These are never disabled at startup for failing [`AuthMode`] validation.
pub const LAZY_AUTH_BACKENDS: &[BackendId] = &[BackendId::Copilot, BackendId::ClaudeCode];

/// Executable whose presence on `PATH` satisfies [`AuthMode::EnvAuth`].
pub const CLAUDE_CODE_COMMAND: &str = "claude";

/// Authentication mode of a backend.
pub fn auth_mode(backend: BackendId) -> AuthMode {
    policy(backend).mode
}

/// Ordered environment variables for a credential kind. First match wins.
pub fn env_vars(backend: BackendId, kind: CredentialKind) -> &'static [&'static str] {
    let row = policy(backend);
    match kind {
        CredentialKind::ApiKey => row.api_key_env,
        CredentialKind::AuthToken => row.auth_token_env,
        CredentialKind::BaseUrl => row.base_url_env,
    }
}

/// First expected environment variable, or an empty string if the backend
/// reads none for this kind.
pub fn get_expected_env_var(backend: BackendId, kind: CredentialKind) -> String {
    env_vars(backend, kind)
        .first()
        .map(|v| v.to_string())
        .unwrap_or_default()
}

/// Hard-coded endpoint used when no base URL is configured.
pub fn default_base_url(backend: BackendId) -> Option<&'static str> {
    policy(backend).default_base_url
}

/// Whether the backend is on the lazy-auth allow-list.
pub fn is_lazy_auth(backend: BackendId) -> bool {
    LAZY_AUTH_BACKENDS.contains(&backend)
}

/// Message returned when a backend's credentials fail validation.
pub fn missing_credential_message(backend: BackendId) -> String {
    match auth_mode(backend) {
        AuthMode::ApiKey => "apiKey is required".to_string(),
        AuthMode::AuthOnly => "authToken is required".to_string(),
        AuthMode::ApiKeyOrAuth => "apiKey or authToken is required".to_string(),
        AuthMode::BaseUrlOnly => "baseUrl is required".to_string(),
        AuthMode::EnvAuth => format!("{backend} host credentials not found"),
    }
}
