//! Access to the host environment.
//!
//! Credential resolution reads environment variables, checks for installed
//! executables, and looks for token files under the user's config home. All of
//! that goes through [`Environment`] so tests can substitute a fixed view.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Read-only view of the host environment.
pub trait Environment: Send + Sync {
    /// Value of an environment variable, `None` if unset or blank.
    fn var(&self, name: &str) -> Option<String>;

    /// Whether an executable is on `PATH`.
    fn has_command(&self, command: &str) -> bool {
        which::which(command).is_ok()
    }

    /// Base directory for per-user tool configuration (`~/.config`).
    fn config_home(&self) -> Option<PathBuf> {
        self.var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
    }
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }
}

/// A fixed environment, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
    commands: HashSet<String>,
    config_home: Option<PathBuf>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.commands.insert(command.into());
        self
    }

    pub fn with_config_home(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_home = Some(path.into());
        self
    }
}

impl Environment for MapEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.vars
            .get(name)
            .filter(|v| !v.trim().is_empty())
            .cloned()
    }

    fn has_command(&self, command: &str) -> bool {
        self.commands.contains(command)
    }

    fn config_home(&self) -> Option<PathBuf> {
        self.config_home.clone()
    }
}
