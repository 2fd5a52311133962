//! Connection verification.
//!
//! One minimal authenticated round-trip per backend family, usually a
//! models listing. The probe goes through reqwest first; if that fails at the
//! network level it is retried through the `curl` executable.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::auth::{CredentialResolver, missing_credential_message};
use crate::providers::ollama_base_url;
use crate::{BackendId, Error, ProviderConfig, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Status and body of a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A way of issuing GET probes. `Err` means the request never got a
/// response; any HTTP status is `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<ProbeResponse>;
}

/// Primary transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<ProbeResponse> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await.map_err(Error::from_reqwest)?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(ProbeResponse { status, body })
    }
}

/// Alternate transport through the `curl` executable.
///
/// Useful behind proxies or TLS setups the system curl is configured for.
#[derive(Debug, Clone)]
pub struct CurlTransport {
    program: String,
}

impl CurlTransport {
    pub fn new() -> Self {
        Self {
            program: "curl".to_string(),
        }
    }

    /// `None` when curl is not installed.
    pub fn detect() -> Option<Self> {
        which::which("curl").ok().map(|_| Self::new())
    }
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self::new()
    }
}

const STATUS_MARKER: &str = "\n__vibes_status:";

fn parse_curl_output(stdout: &str) -> Option<ProbeResponse> {
    let (body, status) = stdout.rsplit_once(STATUS_MARKER)?;
    let status = status.trim().parse().ok()?;
    Some(ProbeResponse {
        status,
        body: body.to_string(),
    })
}

impl CurlTransport {
    /// Headers are read from stdin so secrets never show up in the
    /// process list.
    fn command(&self, url: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-sS")
            .arg("--max-time")
            .arg(PROBE_TIMEOUT.as_secs().to_string())
            .arg("-w")
            .arg(format!("{STATUS_MARKER}%{{http_code}}"))
            .arg("-H")
            .arg("@-")
            .arg(url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn header_lines(headers: &[(String, String)]) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{name}: {value}\n"))
        .collect()
}

#[async_trait]
impl Transport for CurlTransport {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<ProbeResponse> {
        let mut child = self.command(url).spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(header_lines(headers).as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_curl_output(&stdout) {
            Some(response) if response.status != 0 => Ok(response),
            _ => Err(Error::Network(format!(
                "curl failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

/// Result of verifying one backend.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// Credentials work. Carries a base URL to use instead of the
    /// configured one when only the alternate endpoint answered.
    Verified { endpoint_override: Option<String> },
    /// The backend rejected the credentials.
    Unauthorized(String),
    /// Anything else.
    Failed(Error),
}

enum Family {
    Anthropic,
    Google,
    Ollama,
    OpenAiCompat,
}

fn family(backend: BackendId) -> Option<Family> {
    match backend {
        BackendId::Anthropic => Some(Family::Anthropic),
        BackendId::Google => Some(Family::Google),
        BackendId::Ollama => Some(Family::Ollama),
        BackendId::ClaudeCode => None,
        BackendId::OpenAi
        | BackendId::Groq
        | BackendId::Mistral
        | BackendId::DeepSeek
        | BackendId::Xai
        | BackendId::OpenRouter
        | BackendId::Copilot
        | BackendId::LmStudio
        | BackendId::OpenAiCompatible => Some(Family::OpenAiCompat),
    }
}

/// `/v1` appended, or stripped if already present.
fn alternate_base(base: &str) -> String {
    match base.strip_suffix("/v1") {
        Some(stripped) => stripped.to_string(),
        None => format!("{base}/v1"),
    }
}

/// Performs verification probes.
pub struct ConnectionVerifier {
    primary: Arc<dyn Transport>,
    fallback: Option<Arc<dyn Transport>>,
    resolver: CredentialResolver,
}

impl ConnectionVerifier {
    /// reqwest, with curl as the fallback when it is installed.
    pub fn new(resolver: CredentialResolver) -> Self {
        Self {
            primary: Arc::new(ReqwestTransport::new()),
            fallback: CurlTransport::detect().map(|t| Arc::new(t) as Arc<dyn Transport>),
            resolver,
        }
    }

    pub fn with_transports(
        resolver: CredentialResolver,
        primary: Arc<dyn Transport>,
        fallback: Option<Arc<dyn Transport>>,
    ) -> Self {
        Self {
            primary,
            fallback,
            resolver,
        }
    }

    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<ProbeResponse> {
        match self.primary.get(url, headers).await {
            Ok(response) => Ok(response),
            Err(e @ (Error::Network(_) | Error::Timeout(_))) => match &self.fallback {
                Some(fallback) => {
                    debug!(url, error = %e, "primary transport failed, trying fallback");
                    fallback.get(url, headers).await
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    fn bearer(&self, backend: BackendId, config: &ProviderConfig) -> Option<String> {
        config
            .api_key
            .as_ref()
            .filter(|k| !k.is_blank())
            .or(config.auth_token.as_ref().filter(|t| !t.is_blank()))
            .map(|s| s.expose_secret().to_string())
            .or_else(|| self.resolver.discover_token(backend))
    }

    fn probe_request(
        &self,
        family: &Family,
        backend: BackendId,
        base: &str,
        config: &ProviderConfig,
    ) -> (String, Vec<(String, String)>) {
        let mut headers: Vec<(String, String)> = Vec::new();
        let url = match family {
            Family::Anthropic => {
                headers.push(("anthropic-version".into(), ANTHROPIC_VERSION.into()));
                if let Some(key) = config.api_key.as_ref().filter(|k| !k.is_blank()) {
                    headers.push(("x-api-key".into(), key.expose_secret().into()));
                } else if let Some(token) = &config.auth_token {
                    headers.push((
                        "authorization".into(),
                        format!("Bearer {}", token.expose_secret()),
                    ));
                    headers.push(("anthropic-beta".into(), "oauth-2025-04-20".into()));
                }
                format!("{base}/v1/models")
            }
            Family::Google => {
                if let Some(key) = &config.api_key {
                    headers.push(("x-goog-api-key".into(), key.expose_secret().into()));
                }
                format!("{base}/models")
            }
            Family::Ollama => format!("{}/api/tags", ollama_base_url(base)),
            Family::OpenAiCompat => {
                if let Some(token) = self.bearer(backend, config) {
                    headers.push(("authorization".into(), format!("Bearer {token}")));
                }
                format!("{base}/models")
            }
        };
        headers.extend(config.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        (url, headers)
    }

    /// Verify `config` against `backend`.
    pub async fn probe(&self, backend: BackendId, config: &ProviderConfig) -> ProbeOutcome {
        let Some(family) = family(backend) else {
            return if self.resolver.has_host_credentials(backend) {
                ProbeOutcome::Verified {
                    endpoint_override: None,
                }
            } else {
                ProbeOutcome::Failed(Error::MissingCredential {
                    backend: backend.to_string(),
                    message: missing_credential_message(backend),
                })
            };
        };
        let Some(base) = config.effective_base_url() else {
            return ProbeOutcome::Failed(Error::MissingCredential {
                backend: backend.to_string(),
                message: missing_credential_message(backend),
            });
        };

        let (url, headers) = self.probe_request(&family, backend, &base, config);
        debug!(provider = %backend, url = %url, "verifying connection");
        let response = match self.fetch(&url, &headers).await {
            Ok(response) => response,
            Err(e) => return ProbeOutcome::Failed(e),
        };

        match response.status {
            _ if response.is_success() => ProbeOutcome::Verified {
                endpoint_override: None,
            },
            401 | 403 => ProbeOutcome::Unauthorized(
                Error::from_status(response.status, response.body).to_string(),
            ),
            404 if matches!(family, Family::OpenAiCompat) => {
                let alternate = alternate_base(&base);
                let (url, headers) = self.probe_request(&family, backend, &alternate, config);
                match self.fetch(&url, &headers).await {
                    Ok(alt) if alt.is_success() => {
                        info!(provider = %backend, base_url = %alternate, "alternate endpoint answered");
                        ProbeOutcome::Verified {
                            endpoint_override: Some(alternate),
                        }
                    }
                    _ => ProbeOutcome::Failed(Error::from_status(404, response.body)),
                }
            }
            status => ProbeOutcome::Failed(Error::from_status(status, response.body)),
        }
    }
}

impl std::fmt::Debug for ConnectionVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionVerifier")
            .field("has_fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::auth::MapEnv;

    /// Answers from a fixed table; unknown URLs are network failures.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: HashMap<String, u16>,
        seen: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl ScriptedTransport {
        fn with(mut self, url: &str, status: u16) -> Self {
            self.responses.insert(url.to_string(), status);
            self
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<ProbeResponse> {
            self.seen
                .lock()
                .unwrap()
                .push((url.to_string(), headers.to_vec()));
            match self.responses.get(url) {
                Some(&status) => Ok(ProbeResponse {
                    status,
                    body: String::new(),
                }),
                None => Err(Error::Network("connection refused".into())),
            }
        }
    }

    fn resolver() -> CredentialResolver {
        CredentialResolver::new(Arc::new(MapEnv::new()))
    }

    fn verifier(primary: ScriptedTransport) -> (ConnectionVerifier, Arc<ScriptedTransport>) {
        let primary = Arc::new(primary);
        (
            ConnectionVerifier::with_transports(resolver(), primary.clone(), None),
            primary,
        )
    }

    #[tokio::test]
    async fn anthropic_probe_uses_api_key_header() {
        let (v, transport) = verifier(
            ScriptedTransport::default().with("https://api.anthropic.com/v1/models", 200),
        );
        let config = ProviderConfig::new(BackendId::Anthropic).with_api_key("sk-ant");
        let outcome = v.probe(BackendId::Anthropic, &config).await;
        assert!(matches!(
            outcome,
            ProbeOutcome::Verified {
                endpoint_override: None
            }
        ));
        let seen = transport.seen.lock().unwrap();
        assert!(seen[0].1.contains(&("x-api-key".into(), "sk-ant".into())));
        assert!(
            seen[0]
                .1
                .contains(&("anthropic-version".into(), "2023-06-01".into()))
        );
    }

    #[tokio::test]
    async fn unauthorized_status() {
        let (v, _) = verifier(
            ScriptedTransport::default().with("https://api.openai.com/v1/models", 401),
        );
        let config = ProviderConfig::new(BackendId::OpenAi).with_api_key("sk-bad");
        assert!(matches!(
            v.probe(BackendId::OpenAi, &config).await,
            ProbeOutcome::Unauthorized(_)
        ));
    }

    #[tokio::test]
    async fn not_found_tries_alternate_base() {
        let (v, _) = verifier(
            ScriptedTransport::default()
                .with("http://10.0.0.5:8000/models", 404)
                .with("http://10.0.0.5:8000/v1/models", 200),
        );
        let config = ProviderConfig::new(BackendId::OpenAiCompatible)
            .with_base_url("http://10.0.0.5:8000");
        match v.probe(BackendId::OpenAiCompatible, &config).await {
            ProbeOutcome::Verified { endpoint_override } => {
                assert_eq!(endpoint_override.as_deref(), Some("http://10.0.0.5:8000/v1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn alternate_base_strips_v1() {
        assert_eq!(alternate_base("http://h/v1"), "http://h");
        assert_eq!(alternate_base("http://h"), "http://h/v1");
    }

    #[tokio::test]
    async fn network_failure_falls_back_to_second_transport() {
        let primary = Arc::new(ScriptedTransport::default());
        let fallback = Arc::new(
            ScriptedTransport::default().with("https://api.groq.com/openai/v1/models", 200),
        );
        let v = ConnectionVerifier::with_transports(resolver(), primary, Some(fallback.clone()));
        let config = ProviderConfig::new(BackendId::Groq).with_api_key("gsk");
        assert!(matches!(
            v.probe(BackendId::Groq, &config).await,
            ProbeOutcome::Verified { .. }
        ));
        assert_eq!(fallback.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn network_failure_without_fallback() {
        let (v, _) = verifier(ScriptedTransport::default());
        let config = ProviderConfig::new(BackendId::Groq).with_api_key("gsk");
        match v.probe(BackendId::Groq, &config).await {
            ProbeOutcome::Failed(Error::Network(_)) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn claude_code_checks_cli() {
        let (v, transport) = verifier(ScriptedTransport::default());
        let config = ProviderConfig::new(BackendId::ClaudeCode);
        assert!(matches!(
            v.probe(BackendId::ClaudeCode, &config).await,
            ProbeOutcome::Failed(Error::MissingCredential { .. })
        ));
        assert!(transport.seen.lock().unwrap().is_empty());

        let v = ConnectionVerifier::with_transports(
            CredentialResolver::new(Arc::new(MapEnv::new().with_command("claude"))),
            Arc::new(ScriptedTransport::default()),
            None,
        );
        assert!(matches!(
            v.probe(BackendId::ClaudeCode, &config).await,
            ProbeOutcome::Verified { .. }
        ));
    }

    #[tokio::test]
    async fn ollama_probes_tags() {
        let (v, _) = verifier(
            ScriptedTransport::default().with("http://127.0.0.1:11434/api/tags", 200),
        );
        let config = ProviderConfig::new(BackendId::Ollama).with_base_url("127.0.0.1:11434");
        assert!(matches!(
            v.probe(BackendId::Ollama, &config).await,
            ProbeOutcome::Verified { .. }
        ));
    }

    #[test]
    fn curl_output_parsing() {
        let parsed = parse_curl_output("{\"data\":[]}\n__vibes_status:200").unwrap();
        assert_eq!(parsed.status, 200);
        assert_eq!(parsed.body, "{\"data\":[]}");
        assert!(parse_curl_output("garbage").is_none());
    }

    #[test]
    fn curl_keeps_secrets_out_of_argv() {
        let headers = vec![
            ("x-api-key".to_string(), "sk-ant-secret".to_string()),
            ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
        ];
        let cmd = CurlTransport::new().command("https://api.anthropic.com/v1/models");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(args.iter().all(|a| !a.contains("sk-ant-secret")));
        assert!(args.windows(2).any(|w| w[0] == "-H" && w[1] == "@-"));
        assert_eq!(
            header_lines(&headers),
            "x-api-key: sk-ant-secret\nanthropic-version: 2023-06-01\n"
        );
    }
}
