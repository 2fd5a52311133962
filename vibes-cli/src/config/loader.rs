use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use vibes_models::BackendId;

use super::types::{
    DEFAULT_MODEL, ModelsConfig, ProviderSection, RawModelsConfig, RawVibesConfig, VibesConfig,
};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<VibesConfig> {
        Self::load_from(&Self::user_config_path(), &Self::project_config_path())
    }

    /// Load merged configuration from explicit paths. Missing files are skipped.
    pub fn load_from(user_path: &Path, project_path: &Path) -> Result<VibesConfig> {
        let mut raw = RawVibesConfig::default();

        // Layer 1: User config
        if let Some(user_config) = Self::read_raw(user_path)? {
            raw = Self::merge_raw(raw, user_config);
        }

        // Layer 2: Project config
        if let Some(project_config) = Self::read_raw(project_path)? {
            raw = Self::merge_raw(raw, project_config);
        }

        Ok(Self::finalize(raw))
    }

    fn read_raw(path: &Path) -> Result<Option<RawVibesConfig>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(Some(toml::from_str(&contents)?))
    }

    /// Get user config path (XDG)
    pub fn user_config_path() -> PathBuf {
        vibes_paths::user_config_file()
    }

    /// Get project config path
    /// Can be overridden with VIBES_PROJECT_CONFIG_DIR env var (useful for isolated e2e tests)
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("VIBES_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".vibes/config.toml")
        }
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawVibesConfig, overlay: RawVibesConfig) -> RawVibesConfig {
        let mut providers = base.models.providers;
        for (name, section) in overlay.models.providers {
            let merged = match providers.remove(&name) {
                Some(existing) => Self::merge_section(existing, section),
                None => section,
            };
            providers.insert(name, merged);
        }

        RawVibesConfig {
            models: RawModelsConfig {
                default_model: overlay.models.default_model.or(base.models.default_model),
                fallback: overlay.models.fallback.or(base.models.fallback),
                preferred_provider: overlay
                    .models
                    .preferred_provider
                    .or(base.models.preferred_provider),
                providers,
            },
        }
    }

    fn merge_section(base: ProviderSection, overlay: ProviderSection) -> ProviderSection {
        let mut headers = base.headers;
        headers.extend(overlay.headers);
        ProviderSection {
            base_url: overlay.base_url.or(base.base_url),
            selected_models: overlay.selected_models.or(base.selected_models),
            hide_model_selector: overlay.hide_model_selector.or(base.hide_model_selector),
            disabled: overlay.disabled.or(base.disabled),
            headers,
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawVibesConfig) -> VibesConfig {
        VibesConfig {
            models: ModelsConfig {
                default_model: raw
                    .models
                    .default_model
                    .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                fallback: raw.models.fallback.unwrap_or_default(),
                preferred_provider: raw.models.preferred_provider,
                providers: raw.models.providers,
            },
        }
    }

    /// Write the non-secret fields of a backend's section into the config
    /// file at `path`, preserving everything else in the document.
    ///
    /// Creates the file and its parent directories if they don't exist.
    pub fn save_provider_section(
        path: &Path,
        backend: BackendId,
        base_url: Option<&str>,
        selected_models: Option<&[String]>,
    ) -> Result<()> {
        if base_url.is_none() && selected_models.is_none() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let existing = std::fs::read_to_string(path).unwrap_or_default();
        let mut doc = existing.parse::<toml_edit::DocumentMut>()?;

        let models = doc
            .entry("models")
            .or_insert_with(|| toml_edit::Item::Table(toml_edit::Table::new()));
        let providers = models
            .as_table_mut()
            .ok_or_else(|| anyhow::anyhow!("[models] in {} is not a table", path.display()))?
            .entry("providers")
            .or_insert_with(|| {
                let mut table = toml_edit::Table::new();
                table.set_implicit(true);
                toml_edit::Item::Table(table)
            });
        let section = providers
            .as_table_mut()
            .ok_or_else(|| anyhow::anyhow!("[models.providers] is not a table"))?
            .entry(backend.as_str())
            .or_insert_with(|| toml_edit::Item::Table(toml_edit::Table::new()));

        if let Some(url) = base_url {
            section["base_url"] = toml_edit::value(url);
        }
        if let Some(models) = selected_models {
            section["selected_models"] =
                toml_edit::value(models.iter().map(String::as_str).collect::<toml_edit::Array>());
        }

        std::fs::write(path, doc.to_string())?;
        Ok(())
    }
}

/// Provider sections keyed by parsed backend id. Unknown names are skipped.
pub fn provider_sections(config: &VibesConfig) -> BTreeMap<BackendId, &ProviderSection> {
    config
        .models
        .providers
        .iter()
        .filter_map(|(name, section)| match name.parse::<BackendId>() {
            Ok(backend) => Some((backend, section)),
            Err(_) => {
                tracing::warn!(provider = %name, "ignoring config for unknown backend");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = ConfigLoader::load_from(
            &temp_dir.path().join("user.toml"),
            &temp_dir.path().join("project.toml"),
        )
        .unwrap();
        assert_eq!(config.models.default_model, DEFAULT_MODEL);
        assert!(config.models.providers.is_empty());
    }

    #[test]
    fn test_project_overrides_user_per_field() {
        let temp_dir = TempDir::new().unwrap();
        let user = temp_dir.path().join("user/config.toml");
        let project = temp_dir.path().join(".vibes/config.toml");
        write(
            &user,
            r#"
[models]
default_model = "gpt-5"
fallback = ["gemini-2.5-pro"]

[models.providers.openai-compatible]
base_url = "http://user:8000/v1"
selected_models = ["qwen2.5-coder"]
headers = { "X-Team" = "infra" }
"#,
        );
        write(
            &project,
            r#"
[models]
default_model = "claude-haiku-4-5"

[models.providers.openai-compatible]
base_url = "http://project:8000/v1"
headers = { "X-Project" = "vibes" }
"#,
        );

        let config = ConfigLoader::load_from(&user, &project).unwrap();
        assert_eq!(config.models.default_model, "claude-haiku-4-5");
        assert_eq!(config.models.fallback, vec!["gemini-2.5-pro"]);

        let section = &config.models.providers["openai-compatible"];
        assert_eq!(section.base_url.as_deref(), Some("http://project:8000/v1"));
        assert_eq!(
            section.selected_models,
            Some(vec!["qwen2.5-coder".to_string()])
        );
        assert_eq!(section.headers.len(), 2);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let user = temp_dir.path().join("config.toml");
        write(&user, "[models\n");
        assert!(ConfigLoader::load_from(&user, &temp_dir.path().join("none.toml")).is_err());
    }

    #[test]
    #[serial]
    fn test_project_config_path_env_override() {
        let temp_dir = TempDir::new().unwrap();

        // SAFETY: serialized with every other test that touches the environment
        unsafe {
            std::env::set_var("VIBES_PROJECT_CONFIG_DIR", temp_dir.path());
        }
        let path = ConfigLoader::project_config_path();
        unsafe {
            std::env::remove_var("VIBES_PROJECT_CONFIG_DIR");
        }

        assert_eq!(path, temp_dir.path().join("config.toml"));
        assert_eq!(
            ConfigLoader::project_config_path(),
            PathBuf::from(".vibes/config.toml")
        );
    }

    #[test]
    fn test_save_provider_section_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vibes/config.toml");

        ConfigLoader::save_provider_section(
            &path,
            BackendId::OpenAiCompatible,
            Some("http://10.0.0.5:8000/v1"),
            Some(&["qwen2.5-coder".to_string()]),
        )
        .unwrap();

        let config = ConfigLoader::load_from(&path, &temp_dir.path().join("none.toml")).unwrap();
        let section = &config.models.providers["openai-compatible"];
        assert_eq!(section.base_url.as_deref(), Some("http://10.0.0.5:8000/v1"));
        assert_eq!(
            section.selected_models,
            Some(vec!["qwen2.5-coder".to_string()])
        );
    }

    #[test]
    fn test_save_provider_section_preserves_existing_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        write(
            &path,
            "# my settings\n[models]\ndefault_model = \"gpt-5\"\n\n[models.providers.ollama]\nbase_url = \"http://gpu:11434\"\n",
        );

        ConfigLoader::save_provider_section(
            &path,
            BackendId::LmStudio,
            Some("http://mac:1234/v1"),
            None,
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("# my settings"));
        assert!(content.contains("default_model = \"gpt-5\""));
        assert!(content.contains("http://gpu:11434"));
        assert!(content.contains("[models.providers.lmstudio]"));
    }

    #[test]
    fn test_provider_sections_skip_unknown_backends() {
        let mut config = VibesConfig::default();
        config
            .models
            .providers
            .insert("ollama".to_string(), ProviderSection::default());
        config
            .models
            .providers
            .insert("cohere".to_string(), ProviderSection::default());

        let sections = provider_sections(&config);
        assert_eq!(sections.keys().copied().collect::<Vec<_>>(), vec![BackendId::Ollama]);
    }
}
