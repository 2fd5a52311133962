//! HTTP plumbing shared by the API adapters.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client used by streaming adapters. No overall timeout: streams may run long.
pub(crate) fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            debug!(error = %e, "falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Attach configured extra headers.
pub(crate) fn with_headers(
    mut builder: reqwest::RequestBuilder,
    headers: &BTreeMap<String, String>,
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

/// Send a request, turning non-success statuses into errors.
pub(crate) async fn send(builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = builder.send().await.map_err(Error::from_reqwest)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::from_status(status.as_u16(), body))
}
