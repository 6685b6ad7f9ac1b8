// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI subcommands: `prompt`, `cancel`, `set-mode`, `set-config-option`,
//! and the hidden `__queue-owner` entrypoint.

pub mod cancel;
pub mod prompt;
pub mod queue_owner;
pub mod set_config_option;
pub mod set_mode;

use crate::config::Config;
use crate::paths::QueuePaths;
use crate::record::SessionRecord;
use crate::spawn::OwnerSpawnSpec;

/// Exit code for usage errors.
pub const EXIT_USAGE: i32 = 64;

/// Resolve paths, the session key, and the on-disk session record for a
/// foreground command, creating the record on first use so a spawned owner
/// can read the agent command and working directory from it.
pub fn prepare_session(config: &Config) -> anyhow::Result<(QueuePaths, SessionRecord)> {
    let paths = QueuePaths::from_env()?;
    let key = config.session_key()?;
    let record = crate::record::ensure(&paths, &key)?;
    Ok((paths, record))
}

/// Owner spawn arguments derived from the shared config.
pub fn spawn_spec(config: &Config, session_id: &str) -> OwnerSpawnSpec {
    OwnerSpawnSpec {
        session_id: session_id.to_owned(),
        ttl_ms: config.ttl_ms,
        permission_mode: config.permission_mode.clone(),
        non_interactive_permissions: config.non_interactive_permissions,
        auth_policy: config.auth_policy.clone(),
        timeout_ms: config.timeout_ms,
        verbose: config.verbose,
        suppress_sdk_console_errors: config.suppress_sdk_console_errors,
    }
}
