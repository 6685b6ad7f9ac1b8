// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Spawn-or-attach: reach a live queue owner, starting one when needed.
//!
//! The loop alternates between dialing the owner and (rate-limited) starting
//! a detached owner process, under a single upper deadline. Retryable queue
//! errors (missing ack, disconnects, owner-not-accepting) re-enter the loop;
//! everything else surfaces immediately.

use std::cell::RefCell;
use std::future::Future;
use std::os::unix::process::CommandExt;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::QueueError;
use crate::output::EventSink;
use crate::paths::QueuePaths;
use crate::permissions::PermissionAnswer;
use crate::queue::client::{self, PromptOutcome};
use crate::queue::protocol::PromptSubmission;

/// Upper bound on the whole spawn-or-attach exchange.
pub const ATTACH_DEADLINE: Duration = Duration::from_secs(10);

/// Minimum spacing between detached owner spawn attempts.
pub const SPAWN_MIN_INTERVAL: Duration = Duration::from_millis(250);

/// Sleep between attach attempts.
pub const ATTACH_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Arguments forwarded to a freshly spawned owner process.
#[derive(Debug, Clone)]
pub struct OwnerSpawnSpec {
    pub session_id: String,
    pub ttl_ms: Option<i64>,
    pub permission_mode: Option<String>,
    pub non_interactive_permissions: PermissionAnswer,
    pub auth_policy: Option<String>,
    pub timeout_ms: Option<u64>,
    pub verbose: bool,
    pub suppress_sdk_console_errors: bool,
}

/// Start a detached owner re-entering this binary via the hidden
/// `__queue-owner` subcommand. The child gets its own process group so
/// foreground signals never reach it.
pub fn spawn_detached_owner(spec: &OwnerSpawnSpec) -> std::io::Result<u32> {
    let exe = std::env::current_exe()?;
    let mut cmd = std::process::Command::new(exe);
    cmd.arg("__queue-owner").arg("--session-id").arg(&spec.session_id);
    if let Some(ttl) = spec.ttl_ms {
        cmd.arg("--ttl-ms").arg(ttl.to_string());
    }
    if let Some(ref mode) = spec.permission_mode {
        cmd.arg("--permission-mode").arg(mode);
    }
    cmd.arg("--non-interactive-permissions").arg(match spec.non_interactive_permissions {
        PermissionAnswer::Allow => "allow",
        PermissionAnswer::Deny => "deny",
    });
    if let Some(ref policy) = spec.auth_policy {
        cmd.arg("--auth-policy").arg(policy);
    }
    if let Some(timeout) = spec.timeout_ms {
        cmd.arg("--timeout-ms").arg(timeout.to_string());
    }
    if spec.verbose {
        cmd.arg("--verbose");
    }
    if spec.suppress_sdk_console_errors {
        cmd.arg("--suppress-sdk-console-errors");
    }
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null()).process_group(0);
    let child = cmd.spawn()?;
    let pid = child.id();
    info!(session_id = %spec.session_id, pid, "started detached queue owner");
    Ok(pid)
}

/// Core attach loop over injected attempt/spawn functions; the entry points
/// below bind them to the real queue client and process spawner.
pub async fn attach_with<T, A, AF, S>(
    mut attempt: A,
    mut spawn_owner: S,
    deadline: Duration,
) -> Result<T, QueueError>
where
    A: FnMut() -> AF,
    AF: Future<Output = Result<Option<T>, QueueError>>,
    S: FnMut() -> std::io::Result<()>,
{
    let started = Instant::now();
    let mut last_spawn: Option<Instant> = None;
    loop {
        match attempt().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                let may_spawn = last_spawn.map_or(true, |at| at.elapsed() >= SPAWN_MIN_INTERVAL);
                if may_spawn {
                    last_spawn = Some(Instant::now());
                    if let Err(e) = spawn_owner() {
                        return Err(QueueError::not_accepting(format!(
                            "failed to start queue owner: {e}"
                        )));
                    }
                }
            }
            Err(e) if e.retryable() => {
                debug!("transient queue error, retrying: {e}");
            }
            Err(e) => return Err(e),
        }
        if started.elapsed() >= deadline {
            return Err(QueueError::not_accepting(
                "no queue owner accepted the request within the deadline",
            ));
        }
        tokio::time::sleep(ATTACH_RETRY_DELAY).await;
    }
}

/// Submit a prompt, spawning an owner when none is live.
pub async fn submit_prompt(
    paths: &QueuePaths,
    spec: &OwnerSpawnSpec,
    submission: PromptSubmission,
    sink: &mut dyn EventSink,
) -> Result<PromptOutcome, QueueError> {
    let sink = RefCell::new(sink);
    attach_with(
        || {
            let submission = submission.clone();
            let sink = &sink;
            async move {
                let mut guard = sink.borrow_mut();
                client::try_submit_to_running_owner(
                    paths,
                    &spec.session_id,
                    submission,
                    &mut **guard,
                )
                .await
            }
        },
        || spawn_detached_owner(spec).map(|_| ()),
        ATTACH_DEADLINE,
    )
    .await
}

/// Switch the session mode, spawning an owner when none is live.
pub async fn set_mode(
    paths: &QueuePaths,
    spec: &OwnerSpawnSpec,
    mode_id: &str,
    timeout_ms: Option<u64>,
) -> Result<(), QueueError> {
    attach_with(
        || client::try_set_mode_on_running_owner(paths, &spec.session_id, mode_id, timeout_ms),
        || spawn_detached_owner(spec).map(|_| ()),
        ATTACH_DEADLINE,
    )
    .await
}

/// Set a session config option, spawning an owner when none is live.
pub async fn set_config_option(
    paths: &QueuePaths,
    spec: &OwnerSpawnSpec,
    config_id: &str,
    value: Value,
    timeout_ms: Option<u64>,
) -> Result<Value, QueueError> {
    attach_with(
        || {
            client::try_set_config_option_on_running_owner(
                paths,
                &spec.session_id,
                config_id,
                value.clone(),
                timeout_ms,
            )
        },
        || spawn_detached_owner(spec).map(|_| ()),
        ATTACH_DEADLINE,
    )
    .await
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
