// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `acpx __queue-owner` — hidden entrypoint for the detached owner process
//! started by spawn-or-attach.

use crate::config;
use crate::owner::{self, OwnerConfig};
use crate::paths::QueuePaths;
use crate::permissions::PermissionAnswer;

/// CLI arguments for the hidden `__queue-owner` subcommand.
#[derive(Debug, clap::Args)]
pub struct QueueOwnerArgs {
    /// Session record id (the SessionKey digest).
    #[arg(long)]
    pub session_id: String,

    /// Idle TTL in milliseconds (0 disables the TTL).
    #[arg(long)]
    pub ttl_ms: Option<i64>,

    /// Initial session mode requested from the agent.
    #[arg(long)]
    pub permission_mode: Option<String>,

    /// Auto-response to agent permission requests.
    #[arg(long, value_enum, default_value = "deny")]
    pub non_interactive_permissions: PermissionAnswer,

    /// Authentication policy (reserved).
    #[arg(long)]
    pub auth_policy: Option<String>,

    /// Default per-call timeout in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Verbose diagnostics.
    #[arg(long)]
    pub verbose: bool,

    /// Drop agent SDK console noise instead of logging it.
    #[arg(long)]
    pub suppress_sdk_console_errors: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "ACPX_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (json or text).
    #[arg(long, env = "ACPX_LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

/// Run the queue owner. Returns a process exit code.
pub async fn run(args: &QueueOwnerArgs) -> i32 {
    let level = if args.verbose { "debug" } else { &args.log_level };
    config::init_tracing(level, &args.log_format);

    let paths = match QueuePaths::from_env() {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("error: {e:#}");
            return 1;
        }
    };
    let owner_config = OwnerConfig {
        paths,
        session_id: args.session_id.clone(),
        ttl: owner::normalized_ttl(args.ttl_ms),
        permission_mode: args.permission_mode.clone(),
        non_interactive_permissions: args.non_interactive_permissions,
        auth_policy: args.auth_policy.clone(),
        suppress_sdk_console_errors: args.suppress_sdk_console_errors,
    };
    match owner::run(owner_config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("queue owner failed: {e:#}");
            1
        }
    }
}
