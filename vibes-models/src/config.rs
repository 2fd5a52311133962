//! Per-backend provider configuration.

use std::collections::BTreeMap;

use crate::BackendId;
use crate::auth::{Secret, default_base_url};

/// Effective configuration for one backend.
///
/// One exists per backend identifier. It is produced by the credential
/// resolver and replaced wholesale whenever credentials change.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: BackendId,
    pub api_key: Option<Secret>,
    pub auth_token: Option<Secret>,
    pub base_url: Option<String>,
    /// Allowlist of model ids; empty means every served model.
    pub selected_models: Vec<String>,
    pub hide_model_selector: bool,
    pub disabled: bool,
    /// Extra HTTP headers sent with every request.
    pub headers: BTreeMap<String, String>,
}

impl ProviderConfig {
    /// An empty, enabled configuration.
    pub fn new(name: BackendId) -> Self {
        Self {
            name,
            api_key: None,
            auth_token: None,
            base_url: None,
            selected_models: Vec::new(),
            hide_model_selector: false,
            disabled: false,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<Secret>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<Secret>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_selected_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Configured base URL, or the backend's hard-coded default. Trailing
    /// slashes are stripped.
    pub fn effective_base_url(&self) -> Option<String> {
        self.base_url
            .clone()
            .or_else(|| default_base_url(self.name).map(str::to_string))
            .map(|url| url.trim_end_matches('/').to_string())
    }

    /// Whether `model_id` passes the selected-models allowlist.
    pub fn allows_model(&self, model_id: &str) -> bool {
        self.selected_models.is_empty() || self.selected_models.iter().any(|m| m == model_id)
    }
}

/// Credentials supplied by a live `set_credentials` or `verify_connection`
/// call. Blank strings count as absent.
#[derive(Debug, Clone, Default)]
pub struct CredentialUpdate {
    pub api_key: Option<String>,
    pub auth_token: Option<String>,
    pub base_url: Option<String>,
    pub selected_models: Option<Vec<String>>,
}

impl CredentialUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn selected_models(mut self, models: Vec<String>) -> Self {
        self.selected_models = Some(models);
        self
    }
}

/// Outcome of a registry operation that reports failure as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub success: bool,
    pub error: Option<String>,
}

impl OperationResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_base_url_prefers_configured() {
        let config = ProviderConfig::new(BackendId::Ollama).with_base_url("http://gpu:11434/");
        assert_eq!(config.effective_base_url().as_deref(), Some("http://gpu:11434"));
    }

    #[test]
    fn effective_base_url_uses_default() {
        let config = ProviderConfig::new(BackendId::OpenAi);
        assert_eq!(
            config.effective_base_url().as_deref(),
            Some("https://api.openai.com/v1")
        );
        assert_eq!(
            ProviderConfig::new(BackendId::OpenAiCompatible).effective_base_url(),
            None
        );
    }

    #[test]
    fn empty_allowlist_allows_everything() {
        let config = ProviderConfig::new(BackendId::OpenRouter);
        assert!(config.allows_model("anything"));

        let config = config.with_selected_models(["qwen/qwen3-coder"]);
        assert!(config.allows_model("qwen/qwen3-coder"));
        assert!(!config.allows_model("anything"));
    }

    #[test]
    fn operation_result_constructors() {
        assert_eq!(OperationResult::ok(), OperationResult { success: true, error: None });
        let failed = OperationResult::failed("apiKey is required");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("apiKey is required"));
    }
}
