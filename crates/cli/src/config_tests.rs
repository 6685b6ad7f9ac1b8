// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use clap::Parser;

#[derive(Debug, Parser)]
struct Harness {
    #[command(flatten)]
    config: Config,
}

fn parse(args: &[&str]) -> Config {
    let mut argv = vec!["harness"];
    argv.extend(args);
    Harness::try_parse_from(argv).expect("parse").config
}

#[test]
fn agent_command_is_required() {
    let config = parse(&[]);
    assert!(config.validate().is_err());

    let config = parse(&["--", "claude-code-acp"]);
    assert!(config.validate().is_ok());
    assert_eq!(config.agent, vec!["claude-code-acp"]);
}

#[test]
fn agent_command_keeps_its_own_flags() {
    let config = parse(&["--", "goose", "acp", "--with-builtin", "developer"]);
    assert_eq!(config.agent, vec!["goose", "acp", "--with-builtin", "developer"]);
}

#[test]
fn zero_timeout_is_rejected() {
    let config = parse(&["--timeout-ms", "0", "--", "agent"]);
    assert!(config.validate().is_err());
}

#[test]
fn invalid_log_format_is_rejected() {
    let config = parse(&["--log-format", "yaml", "--", "agent"]);
    assert!(config.validate().is_err());
}

#[test]
fn session_key_uses_explicit_cwd_and_name() {
    let config = parse(&["--cwd", "/nonexistent/acpx-test", "--name", "dev", "--", "agent"]);
    let key = config.session_key().expect("key");
    assert_eq!(key.cwd, std::path::PathBuf::from("/nonexistent/acpx-test"));
    assert_eq!(key.name.as_deref(), Some("dev"));
    assert_eq!(key.agent_command, vec!["agent"]);
}

#[test]
fn client_timeout_maps_to_duration() {
    let config = parse(&["--timeout-ms", "1500", "--", "agent"]);
    assert_eq!(config.client_timeout(), Some(std::time::Duration::from_millis(1500)));
    let config = parse(&["--", "agent"]);
    assert_eq!(config.client_timeout(), None);
}

#[test]
fn defaults() {
    let config = parse(&["--", "agent"]);
    assert_eq!(config.format, crate::output::OutputFormat::Text);
    assert_eq!(
        config.non_interactive_permissions,
        crate::permissions::PermissionAnswer::Deny
    );
    assert_eq!(config.log_level, "info");
    assert!(!config.verbose);
}
