//! End-to-end routing and fallback through the public registry API.
//!
//! Every backend is a scripted mock; nothing here touches the network.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_test::assert_ok;
use vibes_models::auth::MapEnv;
use vibes_models::providers::{MockFactory, Message, ProviderEvent, StreamRequest};
use vibes_models::{
    BackendId, CredentialUpdate, ManualClock, MemoryKeyValidityStore, ModelRegistry,
    OperationResult, ProviderConfig,
};

fn registry(
    factory: Arc<MockFactory>,
    env: MapEnv,
    stored: Vec<ProviderConfig>,
    clock: &ManualClock,
) -> Arc<ModelRegistry> {
    Arc::new(
        ModelRegistry::builder()
            .environment(Arc::new(env))
            .stored_configs(stored)
            .factory(factory)
            .key_state(Arc::new(MemoryKeyValidityStore::new()))
            .clock(Arc::new(clock.clone()))
            .build(),
    )
}

fn keyed(backend: BackendId, key: &str) -> ProviderConfig {
    ProviderConfig::new(backend).with_api_key(key)
}

async fn collect(
    registry: &Arc<ModelRegistry>,
    model: &str,
    preferred: Option<BackendId>,
    fallbacks: &[&str],
) -> Vec<ProviderEvent> {
    let request = StreamRequest::new(model, vec![Message::user("hello")]);
    registry
        .execute_with_retry(
            request,
            preferred,
            fallbacks.iter().map(|m| m.to_string()).collect(),
        )
        .collect()
        .await
}

fn error_count(events: &[ProviderEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ProviderEvent::Error { .. }))
        .count()
}

fn complete_count(events: &[ProviderEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ProviderEvent::Complete { .. }))
        .count()
}

#[test]
fn catalog_models_resolve_only_to_their_backend() {
    let factory = Arc::new(MockFactory::new());
    for backend in BackendId::ALL {
        // Every backend claims every catalog model.
        factory
            .backend(backend)
            .set_models(vibes_models::catalog::entries().iter().map(|e| e.id));
    }
    let stored: Vec<_> = BackendId::ALL.iter().map(|b| keyed(*b, "key")).collect();
    let registry = registry(
        factory,
        MapEnv::new().with_command("claude"),
        stored,
        &ManualClock::new(),
    );

    for entry in vibes_models::catalog::entries() {
        for preferred in std::iter::once(None).chain(BackendId::ALL.map(Some)) {
            if let Some(provider) = registry.resolve_provider(entry.id, preferred) {
                assert_eq!(
                    provider.backend(),
                    entry.provider,
                    "{} routed to {} with preference {:?}",
                    entry.id,
                    provider.backend(),
                    preferred
                );
            }
        }
    }
}

#[tokio::test]
async fn two_failures_then_success_on_third_candidate() {
    let factory = Arc::new(MockFactory::new());
    factory.backend(BackendId::Groq).queue_error("rate limit exceeded");
    factory.backend(BackendId::Mistral).queue_empty();
    factory.backend(BackendId::Xai).queue_content("grok says hi");
    let registry = registry(
        factory.clone(),
        MapEnv::new(),
        vec![
            keyed(BackendId::Groq, "gsk"),
            keyed(BackendId::Mistral, "ms"),
            keyed(BackendId::Xai, "xai"),
        ],
        &ManualClock::new(),
    );

    let events = collect(
        &registry,
        "llama-3.3-70b-versatile",
        None,
        &["mistral-large-latest", "grok-4"],
    )
    .await;

    assert_eq!(error_count(&events), 0);
    assert_eq!(complete_count(&events), 1);
    assert_eq!(events[0], ProviderEvent::content("grok says hi"));
    assert_eq!(registry.circuit_state(BackendId::Groq).failures, 1);
    assert_eq!(registry.circuit_state(BackendId::Mistral).failures, 1);
    assert_eq!(registry.circuit_state(BackendId::Xai).failures, 0);
    assert_eq!(factory.backend(BackendId::Xai).requested_models(), vec!["grok-4"]);
}

#[tokio::test]
async fn exhausted_chain_ends_with_one_error_and_no_complete() {
    let factory = Arc::new(MockFactory::new());
    factory.backend(BackendId::Groq).queue_empty();
    factory.backend(BackendId::Mistral).queue_empty();
    let registry = registry(
        factory,
        MapEnv::new(),
        vec![keyed(BackendId::Groq, "gsk"), keyed(BackendId::Mistral, "ms")],
        &ManualClock::new(),
    );

    let events = collect(
        &registry,
        "llama-3.3-70b-versatile",
        None,
        &["mistral-large-latest"],
    )
    .await;

    assert_eq!(
        events,
        vec![ProviderEvent::error("empty response from mistral")]
    );
    assert_eq!(complete_count(&events), 0);
}

#[test]
fn stored_and_explicit_credentials_beat_environment() {
    let factory = Arc::new(MockFactory::new());
    factory.backend(BackendId::OpenAi);
    factory.backend(BackendId::Google);
    let env = MapEnv::new()
        .with_var("OPENAI_API_KEY", "sk-env")
        .with_var("GEMINI_API_KEY", "gm-env");
    let registry = registry(
        factory,
        env,
        vec![keyed(BackendId::OpenAi, "sk-stored")],
        &ManualClock::new(),
    );

    let key = |backend| {
        registry
            .get(backend)
            .and_then(|p| p.config().api_key.clone())
            .map(|k| k.expose_secret().to_string())
    };
    assert_eq!(key(BackendId::OpenAi).as_deref(), Some("sk-stored"));
    assert_eq!(key(BackendId::Google).as_deref(), Some("gm-env"));

    registry.set_credentials(BackendId::Google, CredentialUpdate::new().api_key("gm-live"));
    assert_eq!(key(BackendId::Google).as_deref(), Some("gm-live"));
}

#[tokio::test]
async fn api_key_backend_lifecycle() {
    let factory = Arc::new(MockFactory::new());
    let groq = factory.backend(BackendId::Groq);
    let clock = ManualClock::new();
    let registry = registry(factory, MapEnv::new(), Vec::new(), &clock);
    let circuit_open = || {
        registry
            .get_status()
            .into_iter()
            .find(|s| s.name == BackendId::Groq)
            .map(|s| s.circuit_open)
    };

    assert_eq!(
        registry.set_credentials(BackendId::Groq, CredentialUpdate::new()),
        OperationResult::failed("apiKey is required")
    );
    let result =
        registry.set_credentials(BackendId::Groq, CredentialUpdate::new().api_key("sk-test"));
    assert!(result.success);
    let provider = assert_ok!(
        registry
            .get(BackendId::Groq)
            .ok_or("groq was not constructed")
    );
    assert!(provider.is_available());

    for _ in 0..5 {
        groq.queue_error("upstream 500");
        collect(&registry, "llama-3.3-70b-versatile", None, &[]).await;
    }
    assert_eq!(circuit_open(), Some(true));

    clock.advance(Duration::from_secs(30));
    assert_eq!(circuit_open(), Some(true));
    clock.advance(Duration::from_secs(30));
    assert_eq!(circuit_open(), Some(false));
    assert_eq!(registry.circuit_state(BackendId::Groq).failures, 0);
}
