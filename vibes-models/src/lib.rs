//! Provider registry for vibes.
//!
//! This crate provides:
//! - Credential resolution against each backend's auth mode
//! - A registry holding one constructed provider per backend
//! - Routing from model ids to providers, honoring catalog pinning
//! - A per-backend circuit breaker and a fallback executor
//! - Adapters that normalize every backend's stream into [`providers::ProviderEvent`]s
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ModelRegistry                         │
//! │                                                              │
//! │  execute_with_retry ──► resolve_provider ──► CircuitBreaker  │
//! │          │                    │                              │
//! │          │              model catalog                        │
//! │          ▼                                                   │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌────────────┐ │
//! │  │ Anthropic  │ │ OpenAI-    │ │   Google   │ │   Ollama   │ │
//! │  │  Provider  │ │ compatible │ │  Provider  │ │  Provider  │ │
//! │  └────────────┘ └────────────┘ └────────────┘ └────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//!           ▲                                      ▲
//!           │ BackendFactory                       │ KeyValidityStore
//! ┌─────────┴──────────────┐            ┌──────────┴─────────────┐
//! │   CredentialResolver   │            │  ConnectionVerifier    │
//! │ update > stored > env  │            │ (reqwest, curl backup) │
//! └────────────────────────┘            └────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use futures_util::StreamExt;
//! use vibes_models::ModelRegistry;
//! use vibes_models::providers::{Message, ProviderEvent, StreamRequest};
//!
//! let registry = Arc::new(ModelRegistry::from_env());
//! let request = StreamRequest::new("claude-sonnet-4-5", vec![Message::user("Hello!")]);
//! let mut events = registry.execute_with_retry(request, None, vec!["gpt-5".into()]);
//! while let Some(event) = events.next().await {
//!     if let ProviderEvent::ContentDelta { text } = event {
//!         print!("{text}");
//!     }
//! }
//! ```

mod backend;
mod config;
mod error;
mod types;

pub mod auth;
pub mod breaker;
pub mod catalog;
pub mod factory;
pub mod providers;
pub mod registry;
pub mod validity;
pub mod verify;

pub use backend::BackendId;
pub use breaker::{CircuitBreaker, CircuitState, Clock, ManualClock, SystemClock};
pub use config::{CredentialUpdate, OperationResult, ProviderConfig};
pub use error::{Error, FailureKind, QUOTA_MARKERS, Result, is_quota_message};
pub use factory::{BackendFactory, DefaultFactory};
pub use registry::{ModelRegistry, ProviderStatus, RegistryBuilder, TestConnectionResult};
pub use types::{Capabilities, ModelDef, ModelDefBuilder, Tier};
pub use validity::{JsonKeyValidityStore, KeyValidityStore, MemoryKeyValidityStore};
pub use verify::ConnectionVerifier;
