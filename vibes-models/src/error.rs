//! Error types for model management.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Message fragments that indicate an exhausted quota or credit balance
/// rather than a hard authentication failure.
pub const QUOTA_MARKERS: &[&str] = &[
    "quota",
    "rate limit",
    "429",
    "insufficient_quota",
    "credit balance",
];

/// Errors that can occur during model operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Backend identifier is not known.
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// A configured base URL does not parse.
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// Backend has no constructed provider.
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    /// A credential the backend's auth mode needs is absent.
    #[error("missing credential for {backend}: {message}")]
    MissingCredential { backend: String, message: String },

    /// The backend rejected the credential (401/403).
    #[error("invalid credentials for {0}")]
    InvalidCredential(String),

    /// The backend's circuit breaker is open.
    #[error("circuit breaker open for {0}")]
    CircuitOpen(String),

    /// The backend finished its stream without producing content.
    #[error("empty response from {0}")]
    EmptyResponse(String),

    /// The account behind the credential ran out of quota or credits.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Provider API returned a non-success status.
    #[error("provider API error ({status}): {message}")]
    ProviderApi { status: u16, message: String },

    /// The provider's stream was malformed or reported an error mid-flight.
    #[error("stream error: {0}")]
    Stream(String),

    /// The request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,

    /// An encrypted credential envelope could not be opened.
    #[error("failed to decrypt credential: {0}")]
    Decrypt(String),

    /// No stored credential exists.
    #[error("credentials not found for provider: {0}")]
    CredentialsNotFound(String),

    /// Failed to access system keyring.
    #[error("keyring error: {0}")]
    Keyring(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a failure, used by connection tests and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credential rejected.
    Auth,
    /// Quota, rate limit, or credit exhaustion.
    Quota,
    /// Transport-level failure.
    Network,
    /// Anything else.
    Other,
}

impl Error {
    /// Map a transport error, keeping timeouts distinct.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }

    /// Build an error from a non-success HTTP status and its body.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let message = extract_error_message(&body).unwrap_or(body);
        Self::ProviderApi { status, message }
    }

    /// Classify this error.
    pub fn classify(&self) -> FailureKind {
        match self {
            Self::InvalidCredential(_) => FailureKind::Auth,
            Self::ProviderApi { status: 401 | 403, .. } => FailureKind::Auth,
            Self::ProviderApi { status: 429, .. } | Self::QuotaExceeded(_) => FailureKind::Quota,
            Self::Network(_) | Self::Timeout(_) => FailureKind::Network,
            other if is_quota_message(&other.to_string()) => FailureKind::Quota,
            _ => FailureKind::Other,
        }
    }
}

/// Whether a message looks like quota or credit exhaustion.
pub fn is_quota_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    QUOTA_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Pull a human-readable message out of a JSON error body.
///
/// Handles `{"error": {"message": ..}}`, `{"error": ".."}` and `{"message": ..}`.
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error").unwrap_or(&value);
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats_correctly() {
        let err = Error::CircuitOpen("openai".to_string());
        assert_eq!(err.to_string(), "circuit breaker open for openai");
    }

    #[test]
    fn error_from_serde_json() {
        let json_err: serde_json::Error = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn from_status_extracts_nested_message() {
        let err = Error::from_status(
            400,
            r#"{"type":"error","error":{"type":"invalid_request_error","message":"bad model"}}"#,
        );
        assert_eq!(err.to_string(), "provider API error (400): bad model");
    }

    #[test]
    fn from_status_keeps_plain_body() {
        let err = Error::from_status(502, "upstream down");
        assert_eq!(err.to_string(), "provider API error (502): upstream down");
    }

    #[test]
    fn classify_auth_statuses() {
        assert_eq!(Error::from_status(401, "").classify(), FailureKind::Auth);
        assert_eq!(Error::from_status(403, "").classify(), FailureKind::Auth);
        assert_eq!(
            Error::InvalidCredential("x".into()).classify(),
            FailureKind::Auth
        );
    }

    #[test]
    fn classify_quota_by_status_and_message() {
        assert_eq!(Error::from_status(429, "").classify(), FailureKind::Quota);
        assert_eq!(
            Error::from_status(400, "Your credit balance is too low").classify(),
            FailureKind::Quota
        );
        assert_eq!(
            Error::Stream("insufficient_quota".into()).classify(),
            FailureKind::Quota
        );
    }

    #[test]
    fn classify_network_and_other() {
        assert_eq!(Error::Network("reset".into()).classify(), FailureKind::Network);
        assert_eq!(Error::Timeout("30s".into()).classify(), FailureKind::Network);
        assert_eq!(Error::Cancelled.classify(), FailureKind::Other);
    }

    #[test]
    fn quota_markers_are_case_insensitive() {
        assert!(is_quota_message("Rate Limit reached"));
        assert!(!is_quota_message("invalid x-api-key"));
    }
}
