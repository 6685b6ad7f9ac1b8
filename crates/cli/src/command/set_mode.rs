// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `acpx set-mode` — switch the agent session mode through the queue owner.

use crate::config::Config;
use crate::error::QueueError;
use crate::output::{EventSink, Formatter, OutputFormat};
use crate::spawn;

use super::EXIT_USAGE;

/// CLI arguments for `acpx set-mode`.
#[derive(Debug, clap::Args)]
pub struct SetModeArgs {
    /// Mode id understood by the agent (e.g. "plan").
    pub mode_id: String,

    #[command(flatten)]
    pub config: Config,
}

/// Run the `acpx set-mode` subcommand. Returns a process exit code.
pub async fn run(args: &SetModeArgs) -> i32 {
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

    let fut = spawn::set_mode(&paths, &spec, &args.mode_id, args.config.timeout_ms);
    let outcome = match args.config.client_timeout() {
        Some(timeout) => match tokio::time::timeout(timeout, fut).await {
            Ok(outcome) => outcome,
            Err(_) => Err(QueueError::Timeout(timeout)),
        },
        None => fut.await,
    };

    match outcome {
        Ok(()) => {
            match args.config.format {
                OutputFormat::Text => println!("mode set to {}", args.mode_id),
                OutputFormat::Ndjson => {
                    println!(
                        "{}",
                        serde_json::json!({"type": "set_mode_result", "modeId": args.mode_id})
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
