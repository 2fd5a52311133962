use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawVibesConfig {
    #[serde(default)]
    pub models: RawModelsConfig,
}

/// `[models]` as stored in TOML
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawModelsConfig {
    pub default_model: Option<String>,
    pub fallback: Option<Vec<String>>,
    pub preferred_provider: Option<String>,

    /// Keyed by backend id, e.g. `[models.providers.openai-compatible]`
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSection>,
}

/// Non-secret settings for one backend. Secrets live in the keyring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_models: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hide_model_selector: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,

    /// Extra HTTP headers sent with every request
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VibesConfig {
    #[serde(default)]
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Model used by `vibes models chat` when none is given
    pub default_model: String,

    /// Fallback chain tried after the default model
    #[serde(default)]
    pub fallback: Vec<String>,

    /// Backend preferred for model ids the catalog does not pin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_provider: Option<String>,

    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSection>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            fallback: Vec::new(),
            preferred_provider: None,
            providers: BTreeMap::new(),
        }
    }
}

/// Default model when none is configured
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
