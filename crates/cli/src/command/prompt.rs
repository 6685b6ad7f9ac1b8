// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `acpx prompt` — submit a prompt turn to the session's queue owner,
//! spawning one when none is live, and stream the turn back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::error::QueueError;
use crate::output::{EventSink, Formatter, OutputFormat};
use crate::paths::QueuePaths;
use crate::queue::client::{self, PromptOutcome};
use crate::queue::protocol::PromptSubmission;
use crate::spawn;

use super::EXIT_USAGE;

/// CLI arguments for `acpx prompt`.
#[derive(Debug, clap::Args)]
pub struct PromptArgs {
    /// Prompt text to send.
    pub message: String,

    /// Return as soon as the owner accepts, without waiting for the turn.
    #[arg(long)]
    pub no_wait: bool,

    #[command(flatten)]
    pub config: Config,
}

/// Run the `acpx prompt` subcommand. Returns a process exit code.
pub async fn run(args: &PromptArgs) -> i32 {
    args.config.init_tracing();
    if let Err(e) = args.config.validate() {
        eprintln!("error: {e}");
        return EXIT_USAGE;
    }
    let (paths, record) = match super::prepare_session(&args.config) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("error: {e:#}");
            return 1;
        }
    };
    let spec = super::spawn_spec(&args.config, &record.id);

    let submission = PromptSubmission {
        message: args.message.clone(),
        permission_mode: args.config.permission_mode.clone(),
        non_interactive_permissions: Some(args.config.non_interactive_permissions),
        timeout_ms: args.config.timeout_ms,
        suppress_sdk_console_errors: args.config.suppress_sdk_console_errors,
        wait_for_completion: !args.no_wait,
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    spawn_interrupt_watcher(paths.clone(), record.id.clone(), interrupted.clone());

    let mut sink = Formatter::new(args.config.format);
    let fut = spawn::submit_prompt(&paths, &spec, submission, &mut sink);
    let outcome = match args.config.client_timeout() {
        Some(timeout) => match tokio::time::timeout(timeout, fut).await {
            Ok(outcome) => outcome,
            Err(_) => Err(QueueError::Timeout(timeout)),
        },
        None => fut.await,
    };

    match outcome {
        Ok(PromptOutcome::Queued { request_id }) => {
            match args.config.format {
                OutputFormat::Text => println!("queued ({request_id})"),
                OutputFormat::Ndjson => {
                    println!(
                        "{}",
                        serde_json::json!({"type": "queued", "requestId": request_id})
                    );
                }
                OutputFormat::Quiet => {}
            }
            0
        }
        Ok(PromptOutcome::Completed { stop_reason, result }) => {
            debug!(%stop_reason, "prompt turn completed");
            if result.permission_denied {
                2
            } else if interrupted.load(Ordering::Acquire) && stop_reason == "cancelled" {
                130
            } else {
                0
            }
        }
        Err(e) => {
            let mut sink = Formatter::new(args.config.format);
            sink.on_error(&(&e).into());
            e.exit_code()
        }
    }
}

/// First SIGINT sends `cancel_prompt` toward the owner; the adapter is
/// never touched directly. A second SIGINT gives up and exits 130.
fn spawn_interrupt_watcher(paths: QueuePaths, session_id: String, interrupted: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        interrupted.store(true, Ordering::Release);
        eprintln!("interrupt: cancelling the in-flight prompt (^C again to exit)");
        match client::try_cancel_on_running_owner(&paths, &session_id).await {
            Ok(Some(cancelled)) => debug!(cancelled, "cancel delivered to owner"),
            Ok(None) => debug!("no live owner to cancel"),
            Err(e) => debug!("cancel request failed: {e}"),
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}
