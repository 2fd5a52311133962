//! XDG Base Directory paths for vibes.
//!
//! CLI tools should use XDG paths for cross-platform consistency,
//! not platform-native paths. This matches tools like gh, docker, kubectl.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "vibes";

/// Get the vibes config directory.
///
/// Returns `$XDG_CONFIG_HOME/vibes` if set, otherwise `~/.config/vibes`.
///
/// # Examples
///
/// ```
/// use vibes_paths::config_dir;
///
/// let config = config_dir();
/// assert!(config.ends_with("vibes"));
/// ```
pub fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

/// Get the vibes data directory.
///
/// Returns `$XDG_DATA_HOME/vibes` if set, otherwise `~/.local/share/vibes`.
/// Persistent model state (invalid key markers, endpoint overrides) lives here.
pub fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

/// Path of the user-level `config.toml`.
pub fn user_config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Path of the JSON document holding per-backend key validity state.
pub fn models_state_file() -> PathBuf {
    data_dir().join("models").join("key-state.json")
}

fn xdg_dir(var: &str, home_relative: &str) -> PathBuf {
    match std::env::var(var) {
        Ok(base) if !base.is_empty() => PathBuf::from(base).join(APP_DIR),
        _ => dirs::home_dir()
            .as_deref()
            .unwrap_or_else(|| Path::new(""))
            .join(home_relative)
            .join(APP_DIR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_dir_ends_with_vibes() {
        assert!(config_dir().ends_with("vibes"));
    }

    #[test]
    fn user_config_file_lives_in_config_dir() {
        let file = user_config_file();
        assert_eq!(file.file_name().unwrap(), "config.toml");
        assert!(file.parent().unwrap().ends_with("vibes"));
    }

    #[test]
    fn models_state_file_lives_under_data_dir() {
        let file = models_state_file();
        assert!(file.ends_with("models/key-state.json"));
    }

    #[test]
    fn xdg_dir_respects_env_and_ignores_empty() {
        // SAFETY: this variable is only read by this test
        unsafe { std::env::set_var("VIBES_PATHS_TEST_HOME", "/tmp/test-xdg") };
        assert_eq!(
            xdg_dir("VIBES_PATHS_TEST_HOME", ".config"),
            PathBuf::from("/tmp/test-xdg/vibes")
        );

        // SAFETY: see above
        unsafe { std::env::set_var("VIBES_PATHS_TEST_HOME", "") };
        let fallback = xdg_dir("VIBES_PATHS_TEST_HOME", ".config");
        assert!(fallback.ends_with(".config/vibes"));

        // SAFETY: see above
        unsafe { std::env::remove_var("VIBES_PATHS_TEST_HOME") };
    }
}
