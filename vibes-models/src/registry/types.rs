//! Values reported by the registry.

use serde::Serialize;

use crate::BackendId;
use crate::auth::AuthMode;

/// Snapshot of one backend, as shown by `vibes models status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub name: BackendId,
    pub enabled: bool,
    pub authenticated: bool,
    pub available: bool,
    pub models: Vec<String>,
    pub auth_mode: AuthMode,
    pub circuit_open: bool,
    pub has_api_key: bool,
    pub has_auth_token: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// The backend rejected its key and has not been given a new one.
    pub invalid_key: bool,
    pub hide_model_selector: bool,
}

/// Result of a live test completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConnectionResult {
    pub ok: bool,
    /// HTTP status of the failing response, when there was one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// The backend accepted the credentials but has no quota left.
    pub out_of_credits: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestConnectionResult {
    pub fn ok() -> Self {
        Self {
            ok: true,
            status: None,
            out_of_credits: false,
            error: None,
        }
    }

    pub fn failed(status: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            status,
            out_of_credits: false,
            error: Some(error.into()),
        }
    }
}
