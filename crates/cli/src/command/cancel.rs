// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `acpx cancel` — ask the session's queue owner to cancel the in-flight
//! prompt. With no live owner there is nothing to cancel, so no owner is
//! spawned.

use crate::config::Config;
use crate::output::{EventSink, Formatter, OutputFormat};
use crate::queue::client;

use super::EXIT_USAGE;

/// CLI arguments for `acpx cancel`.
#[derive(Debug, clap::Args)]
pub struct CancelArgs {
    #[command(flatten)]
    pub config: Config,
}

/// Run the `acpx cancel` subcommand. Returns a process exit code.
pub async fn run(args: &CancelArgs) -> i32 {
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

    match client::try_cancel_on_running_owner(&paths, &record.id).await {
        Ok(outcome) => {
            let cancelled = outcome.unwrap_or(false);
            match args.config.format {
                OutputFormat::Text => {
                    if cancelled {
                        println!("cancelled");
                    } else if outcome.is_none() {
                        println!("no queue owner running");
                    } else {
                        println!("nothing to cancel");
                    }
                }
                OutputFormat::Ndjson => {
                    println!(
                        "{}",
                        serde_json::json!({"type": "cancel_result", "cancelled": cancelled})
                    );
                }
                OutputFormat::Quiet => {}
            }
            0
        }
        Err(e) => {
            let mut sink = Formatter::new(args.config.format);
            sink.on_error(&(&e).into());
            e.exit_code()
        }
    }
}
