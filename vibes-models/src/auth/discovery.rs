//! Out-of-band token discovery.
//!
//! GitHub Copilot editor plugins persist an OAuth token under
//! `<config home>/github-copilot/{hosts,apps}.json`. Backends on the lazy-auth
//! allow-list may pick it up instead of an explicitly configured token.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use super::Environment;

const COPILOT_DIR: &str = "github-copilot";
const COPILOT_FILES: &[&str] = &["hosts.json", "apps.json"];

/// Find a Copilot OAuth token on disk.
pub fn discover_copilot_token(env: &dyn Environment) -> Option<String> {
    let dir = env.config_home()?.join(COPILOT_DIR);
    COPILOT_FILES
        .iter()
        .find_map(|file| read_oauth_token(&dir.join(file)))
}

fn read_oauth_token(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let value: Value = match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "unreadable copilot token file");
            return None;
        }
    };
    let token = value
        .as_object()?
        .iter()
        .filter(|(host, _)| host.starts_with("github.com"))
        .find_map(|(_, entry)| entry.get("oauth_token")?.as_str())
        .filter(|token| !token.trim().is_empty())?
        .to_string();
    debug!(path = %path.display(), "discovered copilot token");
    Some(token)
}
