// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use acpx::command;

#[derive(Parser)]
#[command(name = "acpx", version, about = "Headless command-line client for ACP agents.")]
struct Cli {
    #[command(subcommand)]
    subcommand: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Submit a prompt turn to the session's queue owner.
    Prompt(command::prompt::PromptArgs),
    /// Cancel the in-flight prompt.
    Cancel(command::cancel::CancelArgs),
    /// Switch the agent session mode.
    SetMode(command::set_mode::SetModeArgs),
    /// Set an agent session config option.
    SetConfigOption(command::set_config_option::SetConfigOptionArgs),
    /// Run as the queue owner for a session (started by spawn-or-attach).
    #[command(name = "__queue-owner", hide = true)]
    QueueOwner(command::queue_owner::QueueOwnerArgs),
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let usage_error = !matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            );
            let _ = e.print();
            std::process::exit(if usage_error { command::EXIT_USAGE } else { 0 });
        }
    };

    let code = match cli.subcommand {
        Commands::Prompt(args) => command::prompt::run(&args).await,
        Commands::Cancel(args) => command::cancel::run(&args).await,
        Commands::SetMode(args) => command::set_mode::run(&args).await,
        Commands::SetConfigOption(args) => command::set_config_option::run(&args).await,
        Commands::QueueOwner(args) => command::queue_owner::run(&args).await,
    };
    std::process::exit(code);
}
