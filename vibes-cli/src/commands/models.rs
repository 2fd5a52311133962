//! AI models management commands.
//!
//! Provides commands for inspecting backends, managing credentials and
//! sending prompts through the resilient router.

use std::io::Write as _;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use dialoguer::{Password, theme::ColorfulTheme};
use futures_util::StreamExt;
use tracing::debug;
use vibes_models::auth::envelope::{self, SECRET_KEY_ENV};
use vibes_models::auth::{AuthMode, CredentialKind, CredentialStore, Secret, auth_mode, env_vars};
use vibes_models::providers::{Message, ProviderEvent, StreamRequest};
use vibes_models::{
    BackendId, Capabilities, CredentialUpdate, JsonKeyValidityStore, ModelDef, ModelRegistry,
    ProviderConfig, ProviderStatus,
};

use crate::config::{ConfigLoader, ProviderSection, VibesConfig, provider_sections};

/// Keyring service name for secrets set through the CLI.
const KEYRING_SERVICE: &str = "vibes";

/// Models management arguments.
#[derive(Args, Debug)]
pub struct ModelsArgs {
    #[command(subcommand)]
    pub command: ModelsCommands,
}

/// Models subcommands.
#[derive(Subcommand, Debug)]
pub enum ModelsCommands {
    /// Show the state of every backend
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List models served by available backends
    List {
        /// Filter by backend (e.g., anthropic, ollama)
        #[arg(long)]
        provider: Option<String>,
    },
    /// Show the environment variables a backend reads
    Env {
        /// Backend id
        provider: String,
    },
    /// Manage backend credentials
    Auth(AuthArgs),
    /// Verify credentials against the backend's models endpoint
    Verify {
        /// Backend id
        provider: String,

        /// Probe this API key instead of the configured one
        #[arg(long)]
        api_key: Option<String>,

        /// Probe this base URL instead of the configured one
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Send a minimal completion to a backend
    Test {
        /// Backend id
        provider: String,
    },
    /// Send a prompt, falling back across models on failure
    Chat {
        /// Prompt text
        prompt: String,

        /// Model to try first (defaults to `models.default_model`)
        #[arg(short, long)]
        model: Option<String>,

        /// Fallback model, tried in the order given (repeatable)
        #[arg(short, long = "fallback")]
        fallback: Vec<String>,

        /// Backend preferred for models outside the catalog
        #[arg(long)]
        provider: Option<String>,

        /// Print thinking output to stderr
        #[arg(long)]
        thinking: bool,
    },
    /// Encrypt a secret for use in an environment variable
    Seal,
}

/// Credential subcommands.
#[derive(Args, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommands,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Store credentials for a backend
    Set {
        /// Backend id
        provider: String,

        /// API key (prompted for when the backend needs one)
        #[arg(long)]
        api_key: Option<String>,

        /// Bearer or OAuth token
        #[arg(long)]
        auth_token: Option<String>,

        /// Endpoint base URL
        #[arg(long)]
        base_url: Option<String>,

        /// Restrict the backend to these models (repeatable)
        #[arg(long = "model")]
        models: Vec<String>,
    },
    /// Delete stored credentials for a backend
    Remove {
        /// Backend id
        provider: String,
    },
}

/// Run models command.
pub async fn run(args: ModelsArgs) -> Result<()> {
    match args.command {
        ModelsCommands::Status { json } => show_status(json),
        ModelsCommands::List { provider } => list_models(provider).await,
        ModelsCommands::Env { provider } => show_env(&provider),
        ModelsCommands::Auth(auth) => match auth.command {
            AuthCommands::Set {
                provider,
                api_key,
                auth_token,
                base_url,
                models,
            } => set_credentials(&provider, api_key, auth_token, base_url, models),
            AuthCommands::Remove { provider } => remove_credentials(&provider),
        },
        ModelsCommands::Verify {
            provider,
            api_key,
            base_url,
        } => verify(&provider, api_key, base_url).await,
        ModelsCommands::Test { provider } => test(&provider).await,
        ModelsCommands::Chat {
            prompt,
            model,
            fallback,
            provider,
            thinking,
        } => chat(prompt, model, fallback, provider, thinking).await,
        ModelsCommands::Seal => seal(),
    }
}

fn parse_backend(name: &str) -> Result<BackendId> {
    name.parse::<BackendId>().with_context(|| {
        let known: Vec<&str> = BackendId::ALL.iter().map(|b| b.as_str()).collect();
        format!("Unknown provider '{}'. Valid: {}", name, known.join(", "))
    })
}

/// Stored configuration for one backend: its config file section plus any
/// keyring secrets. `None` when neither supplies anything.
fn stored_config(
    backend: BackendId,
    section: Option<&ProviderSection>,
    api_key: Option<Secret>,
    auth_token: Option<Secret>,
) -> Option<ProviderConfig> {
    if section.is_none() && api_key.is_none() && auth_token.is_none() {
        return None;
    }

    let mut config = ProviderConfig::new(backend);
    config.api_key = api_key;
    config.auth_token = auth_token;
    if let Some(section) = section {
        config.base_url = section.base_url.clone();
        config.selected_models = section.selected_models.clone().unwrap_or_default();
        config.hide_model_selector = section.hide_model_selector.unwrap_or(false);
        config.disabled = section.disabled.unwrap_or(false);
        config.headers = section.headers.clone();
    }
    Some(config)
}

/// Build the registry from the merged config file and the keyring.
fn build_registry(config: &VibesConfig) -> ModelRegistry {
    let store = CredentialStore::new(KEYRING_SERVICE);
    let sections = provider_sections(config);
    let stored: Vec<ProviderConfig> = BackendId::ALL
        .into_iter()
        .filter_map(|backend| {
            stored_config(
                backend,
                sections.get(&backend).copied(),
                store.get(backend, CredentialKind::ApiKey),
                store.get(backend, CredentialKind::AuthToken),
            )
        })
        .collect();
    debug!(stored = stored.len(), "loaded stored provider configs");

    ModelRegistry::builder()
        .stored_configs(stored)
        .key_state(Arc::new(JsonKeyValidityStore::open_default()))
        .build()
}

fn load_registry() -> Result<ModelRegistry> {
    let config = ConfigLoader::load()?;
    Ok(build_registry(&config))
}

/// Show the state of every backend.
fn show_status(json: bool) -> Result<()> {
    let registry = load_registry()?;
    let statuses = registry.get_status();
    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        println!("{}", status_table(&statuses));
    }
    Ok(())
}

fn status_table(statuses: &[ProviderStatus]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Provider").fg(Color::Cyan),
        Cell::new("Auth").fg(Color::Cyan),
        Cell::new("Available").fg(Color::Cyan),
        Cell::new("Models").fg(Color::Cyan),
        Cell::new("Circuit").fg(Color::Cyan),
        Cell::new("Base URL").fg(Color::Cyan),
    ]);

    for status in statuses {
        let available = if status.invalid_key {
            Cell::new("invalid key").fg(Color::Red)
        } else if status.available {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no")
        };
        let circuit = if status.circuit_open {
            Cell::new("open").fg(Color::Yellow)
        } else {
            Cell::new("closed")
        };

        table.add_row(vec![
            Cell::new(status.name),
            Cell::new(status.auth_mode),
            available,
            Cell::new(status.models.len()),
            circuit,
            Cell::new(status.base_url.as_deref().unwrap_or("-")),
        ]);
    }
    table
}

/// List models served by available backends.
async fn list_models(provider_filter: Option<String>) -> Result<()> {
    let filter = provider_filter.as_deref().map(parse_backend).transpose()?;
    let registry = load_registry()?;
    registry.refresh_models().await;

    let models: Vec<ModelDef> = registry
        .get_available()
        .iter()
        .filter(|p| filter.is_none_or(|b| p.backend() == b))
        .flat_map(|p| p.list_models())
        .collect();

    if models.is_empty() {
        if filter.is_some() {
            println!("No models match the specified filters.");
        } else {
            println!("No models available.");
            println!();
            println!("Configure a provider with: vibes models auth set <provider>");
        }
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Provider").fg(Color::Cyan),
        Cell::new("Model").fg(Color::Cyan),
        Cell::new("Tier").fg(Color::Cyan),
        Cell::new("Context").fg(Color::Cyan),
        Cell::new("Capabilities").fg(Color::Cyan),
    ]);

    for model in models {
        let tier = model
            .tier
            .map(|t| format!("{t:?}").to_lowercase())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(model.provider),
            Cell::new(&model.id),
            Cell::new(tier),
            Cell::new(format_context(model.context_window)),
            Cell::new(format_capabilities(&model.capabilities)),
        ]);
    }

    println!("{table}");
    Ok(())
}

/// Show the environment variables a backend reads, marking those set.
fn show_env(provider: &str) -> Result<()> {
    let backend = parse_backend(provider)?;
    println!("{} ({})", backend, auth_mode(backend));
    println!();

    for kind in CredentialKind::ALL {
        let vars = env_vars(backend, kind);
        if vars.is_empty() {
            continue;
        }
        let listed: Vec<String> = vars
            .iter()
            .map(|var| {
                if std::env::var(var).is_ok_and(|v| !v.trim().is_empty()) {
                    format!("{var} (set)")
                } else {
                    (*var).to_string()
                }
            })
            .collect();
        println!("  {:<10} {}", kind.as_str(), listed.join(", "));
    }
    Ok(())
}

/// Which secret to prompt for when none was given on the command line.
fn prompt_kind(mode: AuthMode) -> Option<CredentialKind> {
    match mode {
        AuthMode::ApiKey | AuthMode::ApiKeyOrAuth => Some(CredentialKind::ApiKey),
        AuthMode::AuthOnly => Some(CredentialKind::AuthToken),
        AuthMode::EnvAuth | AuthMode::BaseUrlOnly => None,
    }
}

fn prompt_secret(backend: BackendId, kind: CredentialKind) -> Result<String> {
    let label = match kind {
        CredentialKind::AuthToken => "Auth token",
        _ => "API key",
    };
    let env_hint = env_vars(backend, kind)
        .first()
        .map(|v| format!(" (or set {v})"))
        .unwrap_or_default();
    println!("Enter {} for {}{}", label.to_lowercase(), backend, env_hint);

    let value = Password::with_theme(&ColorfulTheme::default())
        .with_prompt(label)
        .interact()?;
    if value.trim().is_empty() {
        bail!("{} cannot be empty", label);
    }
    Ok(value)
}

/// Validate and store credentials for a backend.
fn set_credentials(
    provider: &str,
    mut api_key: Option<String>,
    mut auth_token: Option<String>,
    base_url: Option<String>,
    models: Vec<String>,
) -> Result<()> {
    let backend = parse_backend(provider)?;

    if api_key.is_none() && auth_token.is_none() {
        match prompt_kind(auth_mode(backend)) {
            Some(CredentialKind::ApiKey) => {
                api_key = Some(prompt_secret(backend, CredentialKind::ApiKey)?);
            }
            Some(CredentialKind::AuthToken) => {
                auth_token = Some(prompt_secret(backend, CredentialKind::AuthToken)?);
            }
            _ => {}
        }
    }

    let mut update = CredentialUpdate::new();
    update.api_key = api_key.clone();
    update.auth_token = auth_token.clone();
    update.base_url = base_url.clone();
    if !models.is_empty() {
        update.selected_models = Some(models.clone());
    }

    let registry = load_registry()?;
    let result = registry.set_credentials(backend, update);
    if !result.success {
        bail!(
            "Invalid credentials for '{}': {}",
            backend,
            result.error.unwrap_or_default()
        );
    }

    let store = CredentialStore::new(KEYRING_SERVICE);
    for (kind, value) in [
        (CredentialKind::ApiKey, api_key),
        (CredentialKind::AuthToken, auth_token),
    ] {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            store.set(backend, kind, value.trim())?;
        }
    }

    let models = (!models.is_empty()).then_some(models);
    let config_path = ConfigLoader::user_config_path();
    ConfigLoader::save_provider_section(
        &config_path,
        backend,
        base_url.as_deref().filter(|u| !u.trim().is_empty()),
        models.as_deref(),
    )?;

    println!("Credentials for '{}' saved.", backend);
    Ok(())
}

/// Delete keyring secrets for a backend.
fn remove_credentials(provider: &str) -> Result<()> {
    let backend = parse_backend(provider)?;
    let store = CredentialStore::new(KEYRING_SERVICE);

    let mut removed = false;
    for kind in [CredentialKind::ApiKey, CredentialKind::AuthToken] {
        match store.delete(backend, kind) {
            Ok(()) => removed = true,
            Err(vibes_models::Error::CredentialsNotFound(_)) => {}
            Err(e) => bail!("Failed to delete credentials: {}", e),
        }
    }

    let registry = load_registry()?;
    registry.remove_api_key(backend);

    if removed {
        println!("Credentials for '{}' deleted.", backend);
    } else {
        println!("No stored credentials found for '{}'.", backend);
    }
    if registry.get(backend).is_some_and(|p| p.is_available()) {
        println!(
            "Note: {} is still configured from the environment ({}).",
            backend,
            env_vars(backend, CredentialKind::ApiKey).join(", ")
        );
    }
    Ok(())
}

async fn verify(provider: &str, api_key: Option<String>, base_url: Option<String>) -> Result<()> {
    let backend = parse_backend(provider)?;
    let registry = load_registry()?;

    let candidate = (api_key.is_some() || base_url.is_some()).then(|| {
        let mut update = CredentialUpdate::new();
        update.api_key = api_key;
        update.base_url = base_url;
        update
    });

    let result = registry.verify_connection(backend, candidate).await;
    match result.error {
        None => {
            println!("{}: connection verified", backend);
            Ok(())
        }
        Some(error) => bail!("{}: {}", backend, error),
    }
}

async fn test(provider: &str) -> Result<()> {
    let backend = parse_backend(provider)?;
    let registry = load_registry()?;

    let result = registry.test_connection(backend).await;
    if result.ok {
        println!("{}: ok", backend);
        return Ok(());
    }

    let error = result.error.unwrap_or_default();
    let status = result
        .status
        .map(|s| format!(" (HTTP {s})"))
        .unwrap_or_default();
    if result.out_of_credits {
        bail!("{}: out of credits{}: {}", backend, status, error);
    }
    bail!("{}: failed{}: {}", backend, status, error)
}

/// Send a prompt through the fallback chain, streaming content to stdout.
async fn chat(
    prompt: String,
    model: Option<String>,
    fallback: Vec<String>,
    provider: Option<String>,
    thinking: bool,
) -> Result<()> {
    let config = ConfigLoader::load()?;
    let preferred = provider
        .or_else(|| config.models.preferred_provider.clone())
        .as_deref()
        .map(parse_backend)
        .transpose()?;
    let model = model.unwrap_or_else(|| config.models.default_model.clone());
    let fallback = if fallback.is_empty() {
        config.models.fallback.clone()
    } else {
        fallback
    };

    let registry = Arc::new(build_registry(&config));
    let request = StreamRequest::new(model, vec![Message::user(prompt)]);

    let cancel = request.cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut events = registry.execute_with_retry(request, preferred, fallback);
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event {
            ProviderEvent::ContentDelta { text } => {
                print!("{text}");
                stdout.flush()?;
            }
            ProviderEvent::ThinkingDelta { text } if thinking => eprint!("{text}"),
            ProviderEvent::UsageUpdate { usage } => debug!(?usage, "usage"),
            ProviderEvent::Complete { stop_reason } => {
                debug!(?stop_reason, "complete");
                println!();
            }
            ProviderEvent::Error { message } => {
                println!();
                bail!("{}", message);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Seal a secret with the passphrase in `VIBES_SECRET_KEY`.
fn seal() -> Result<()> {
    let Ok(key) = std::env::var(SECRET_KEY_ENV) else {
        bail!("{} must be set to seal secrets", SECRET_KEY_ENV);
    };
    let secret = Password::with_theme(&ColorfulTheme::default())
        .with_prompt("Secret")
        .interact()?;
    println!("{}", envelope::seal(&secret, &key)?);
    Ok(())
}

/// Format capabilities as a comma-separated string.
fn format_capabilities(caps: &Capabilities) -> String {
    let mut parts = Vec::new();

    if caps.chat {
        parts.push("chat");
    }
    if caps.vision {
        parts.push("vision");
    }
    if caps.tools {
        parts.push("tools");
    }
    if caps.reasoning {
        parts.push("reasoning");
    }

    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(", ")
    }
}

/// Format context window size in human-readable form.
fn format_context(tokens: u32) -> String {
    if tokens >= 1_000_000 {
        format!("{}M", tokens / 1_000_000)
    } else if tokens >= 1_000 {
        format!("{}K", tokens / 1_000)
    } else if tokens == 0 {
        "-".to_string()
    } else {
        tokens.to_string()
    }
}
