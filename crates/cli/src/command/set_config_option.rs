// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `acpx set-config-option` — set an agent session config option through
//! the queue owner.

use serde_json::Value;

use crate::config::Config;
use crate::error::QueueError;
use crate::output::{EventSink, Formatter, OutputFormat};
use crate::spawn;

use super::EXIT_USAGE;

/// CLI arguments for `acpx set-config-option`.
#[derive(Debug, clap::Args)]
pub struct SetConfigOptionArgs {
    /// Config option id understood by the agent.
    pub config_id: String,

    /// New value; parsed as JSON, falling back to a plain string.
    pub value: String,

    #[command(flatten)]
    pub config: Config,
}

/// Run the `acpx set-config-option` subcommand. Returns a process exit code.
pub async fn run(args: &SetConfigOptionArgs) -> i32 {
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
    let value: Value =
        serde_json::from_str(&args.value).unwrap_or_else(|_| Value::String(args.value.clone()));

    let fut =
        spawn::set_config_option(&paths, &spec, &args.config_id, value, args.config.timeout_ms);
    let outcome = match args.config.client_timeout() {
        Some(timeout) => match tokio::time::timeout(timeout, fut).await {
            Ok(outcome) => outcome,
            Err(_) => Err(QueueError::Timeout(timeout)),
        },
        None => fut.await,
    };

    match outcome {
        Ok(response) => {
            match args.config.format {
                OutputFormat::Text => {
                    println!("{}", serde_json::to_string(&response).unwrap_or_default());
                }
                OutputFormat::Ndjson => {
                    println!(
                        "{}",
                        serde_json::json!({
                            "type": "set_config_option_result",
                            "configId": args.config_id,
                            "response": response,
                        })
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
