// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output formatters for streamed session updates.
//!
//! The queue client hands every owner message to an [`EventSink`]; the three
//! built-in formats are `text` (human-readable stream on stdout, one-line
//! errors on stderr), `ndjson` (one JSON event per line on stdout), and
//! `quiet` (nothing; only the exit code speaks).

use std::io::Write;

use serde_json::{json, Value};

use crate::queue::protocol::{ErrorBody, PromptResultBody};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Ndjson,
    Quiet,
}

/// Sink for owner messages streamed back to a foreground invocation.
pub trait EventSink {
    fn on_update(&mut self, notification: &Value);
    fn on_client_operation(&mut self, operation: &Value);
    fn on_done(&mut self, stop_reason: &str);
    fn on_result(&mut self, result: &PromptResultBody);
    fn on_error(&mut self, error: &ErrorBody);
}

/// Stdout/stderr formatter for the built-in output formats.
pub struct Formatter {
    format: OutputFormat,
    /// Whether text mode has written chunk text without a trailing newline.
    mid_line: bool,
}

impl Formatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format, mid_line: false }
    }

    fn emit_event(&self, event: Value) {
        let mut stdout = std::io::stdout().lock();
        let _ = serde_json::to_writer(&mut stdout, &event);
        let _ = stdout.write_all(b"\n");
    }

    fn finish_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }
}

impl EventSink for Formatter {
    fn on_update(&mut self, notification: &Value) {
        match self.format {
            OutputFormat::Text => {
                if let Some(text) = update_text(notification) {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                    self.mid_line = !text.ends_with('\n');
                } else if let Some(title) = update_tool_title(notification) {
                    self.finish_line();
                    println!("▷ {title}");
                }
            }
            OutputFormat::Ndjson => {
                self.emit_event(json!({"type": "session_update", "notification": notification}));
            }
            OutputFormat::Quiet => {}
        }
    }

    fn on_client_operation(&mut self, operation: &Value) {
        match self.format {
            OutputFormat::Text => {
                if let Some(kind) = operation.get("kind").and_then(Value::as_str) {
                    self.finish_line();
                    println!("▷ {kind}");
                }
            }
            OutputFormat::Ndjson => {
                self.emit_event(json!({"type": "client_operation", "operation": operation}));
            }
            OutputFormat::Quiet => {}
        }
    }

    fn on_done(&mut self, stop_reason: &str) {
        match self.format {
            OutputFormat::Text => self.finish_line(),
            OutputFormat::Ndjson => {
                self.emit_event(json!({"type": "done", "stopReason": stop_reason}));
            }
            OutputFormat::Quiet => {}
        }
    }

    fn on_result(&mut self, result: &PromptResultBody) {
        match self.format {
            OutputFormat::Text => self.finish_line(),
            OutputFormat::Ndjson => {
                self.emit_event(json!({"type": "result", "result": result}));
            }
            OutputFormat::Quiet => {}
        }
    }

    fn on_error(&mut self, error: &ErrorBody) {
        match self.format {
            OutputFormat::Text => {
                self.finish_line();
                eprintln!("error: {} ({})", error.message, error.detail_code);
            }
            OutputFormat::Ndjson => {
                self.emit_event(json!({"type": "error", "error": error}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Extract streamed agent text from an ACP `session/update` notification.
pub fn update_text(notification: &Value) -> Option<&str> {
    let update = notification.get("update")?;
    let kind = update.get("sessionUpdate")?.as_str()?;
    if kind != "agent_message_chunk" {
        return None;
    }
    update.get("content")?.get("text")?.as_str()
}

/// Extract a tool-call title from an ACP `session/update` notification.
pub fn update_tool_title(notification: &Value) -> Option<&str> {
    let update = notification.get("update")?;
    let kind = update.get("sessionUpdate")?.as_str()?;
    if kind != "tool_call" {
        return None;
    }
    update.get("title")?.as_str()
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
