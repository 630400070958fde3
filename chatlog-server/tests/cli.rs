//! Process-level checks of the `chatlog` binary.

use std::process::{Command, Output};

use tempfile::TempDir;

fn chatlog(dir: &TempDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_chatlog"))
        .args(args)
        .current_dir(dir.path())
        .env_clear()
        .env("RUST_LOG", "error")
        .output()
        .expect("run chatlog")
}

#[test]
fn help_lists_both_subcommands() {
    let dir = tempfile::tempdir().unwrap();
    let output = chatlog(&dir, &["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("serve"));
    assert!(stdout.contains("ingest"));
}

#[test]
fn unknown_subcommand_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = chatlog(&dir, &["replay"]);
    assert!(!output.status.success());
}

#[test]
fn unreadable_config_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let output = chatlog(&dir, &["serve", "--config", "missing.yaml"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid configuration"));
}

#[test]
fn ingest_without_channels_fails_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("chatlog.toml");
    std::fs::write(&config, "[store]\nbackend = \"memory\"\n").unwrap();

    let output = chatlog(&dir, &["ingest", "--config", config.to_str().unwrap()]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid transport configuration"));
}
