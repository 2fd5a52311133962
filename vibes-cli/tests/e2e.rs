//! End-to-end integration tests for vibes-cli
//!
//! These run the built binary and are gated behind the `integration`
//! feature flag. Run with:
//!
//! ```sh
//! cargo test -p vibes-cli --features integration
//! ```

#![cfg(feature = "integration")]

use std::process::{Command, Output};

use tempfile::TempDir;

fn vibes(args: &[&str], project_dir: &TempDir) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vibes"))
        .args(args)
        .env("VIBES_PROJECT_CONFIG_DIR", project_dir.path())
        .output()
        .expect("Failed to run vibes")
}

/// Test that vibes --help lists the subcommands
#[test]
fn vibes_help_works() {
    let dir = TempDir::new().unwrap();
    let output = vibes(&["--help"], &dir);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Model provider registry"));
    assert!(stdout.contains("models"));
    assert!(stdout.contains("config"));
}

/// Test that vibes models --help shows every operation
#[test]
fn vibes_models_help_shows_subcommands() {
    let dir = TempDir::new().unwrap();
    let output = vibes(&["models", "--help"], &dir);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["status", "list", "env", "auth", "verify", "test", "chat"] {
        assert!(stdout.contains(command), "missing {command}");
    }
}

/// Test that project config is picked up from VIBES_PROJECT_CONFIG_DIR
#[test]
fn vibes_config_show_reads_project_config() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "[models]\ndefault_model = \"gpt-5\"\n",
    )
    .unwrap();

    let output = vibes(&["config", "show"], &dir);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[models]"));
    assert!(stdout.contains("default_model = \"gpt-5\""));
}

/// Test that vibes config path shows paths
#[test]
fn vibes_config_path_shows_paths() {
    let dir = TempDir::new().unwrap();
    let output = vibes(&["config", "path"], &dir);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("User config:"));
    assert!(stdout.contains("Project config:"));
    assert!(stdout.contains("Key state:"));
}

/// Test that vibes models env lists the backend's variables
#[test]
fn vibes_models_env_lists_variables() {
    let dir = TempDir::new().unwrap();
    let output = vibes(&["models", "env", "anthropic"], &dir);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ANTHROPIC_API_KEY"));
    assert!(stdout.contains("ANTHROPIC_AUTH_TOKEN"));
    assert!(stdout.contains("ANTHROPIC_BASE_URL"));
}

/// Test that an unknown backend is rejected with the valid ids
#[test]
fn vibes_models_env_rejects_unknown_backend() {
    let dir = TempDir::new().unwrap();
    let output = vibes(&["models", "env", "cohere"], &dir);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown provider 'cohere'"));
}
