// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::output::OutputFormat;
use crate::paths::SessionKey;
use crate::permissions::PermissionAnswer;

/// Flags shared by every foreground subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct Config {
    /// Working directory for the agent (defaults to the current directory).
    #[arg(long, env = "ACPX_CWD")]
    pub cwd: Option<PathBuf>,

    /// Session name, for running several sessions in one directory.
    #[arg(long, env = "ACPX_SESSION_NAME")]
    pub name: Option<String>,

    /// Owner idle TTL in milliseconds (0 keeps the owner alive until signaled).
    #[arg(long, env = "ACPX_TTL_MS")]
    pub ttl_ms: Option<i64>,

    /// Client-side bound on this call, in milliseconds.
    #[arg(long, env = "ACPX_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Output format.
    #[arg(long, env = "ACPX_FORMAT", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Initial session mode requested from the agent.
    #[arg(long, env = "ACPX_PERMISSION_MODE")]
    pub permission_mode: Option<String>,

    /// Auto-response to agent permission requests.
    #[arg(long, env = "ACPX_NON_INTERACTIVE_PERMISSIONS", value_enum, default_value = "deny")]
    pub non_interactive_permissions: PermissionAnswer,

    /// Authentication policy handed to the owner (reserved).
    #[arg(long, env = "ACPX_AUTH_POLICY")]
    pub auth_policy: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "ACPX_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (json or text).
    #[arg(long, env = "ACPX_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Verbose diagnostics (same as --log-level debug).
    #[arg(long)]
    pub verbose: bool,

    /// Drop agent SDK console noise instead of logging it.
    #[arg(long)]
    pub suppress_sdk_console_errors: bool,

    /// Agent adapter command (after --).
    #[arg(last = true)]
    pub agent: Vec<String>,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent.is_empty() {
            anyhow::bail!("an agent command is required (after --)");
        }
        if self.timeout_ms == Some(0) {
            anyhow::bail!("--timeout-ms must be positive");
        }
        match self.log_format.as_str() {
            "json" | "text" => Ok(()),
            other => anyhow::bail!("invalid log format: {other}"),
        }
    }

    /// Resolve the session key for this invocation. The working directory is
    /// canonicalized so invocations from symlinked paths share a session.
    pub fn session_key(&self) -> anyhow::Result<SessionKey> {
        let cwd = match self.cwd {
            Some(ref cwd) => cwd.clone(),
            None => std::env::current_dir()?,
        };
        let cwd = cwd.canonicalize().unwrap_or(cwd);
        Ok(SessionKey::new(self.agent.clone(), cwd, self.name.clone()))
    }

    /// Absolute bound on this foreground call.
    pub fn client_timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    fn effective_log_level(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }

    /// Initialize tracing from the config.
    ///
    /// Priority: `--log-level` / `ACPX_LOG_LEVEL` > `RUST_LOG` > "info".
    /// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
    pub fn init_tracing(&self) {
        init_tracing(self.effective_log_level(), &self.log_format);
    }
}

/// Shared tracing init for foreground commands and the owner subcommand.
pub fn init_tracing(log_level: &str, log_format: &str) {
    use tracing_subscriber::fmt;

    let filter = if std::env::var("ACPX_LOG_LEVEL").is_err() && log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
    } else {
        EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match log_format {
        "json" => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
