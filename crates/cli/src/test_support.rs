// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: scripted runners, collecting sinks, and
//! temp-directory contexts.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::QueueError;
use crate::output::EventSink;
use crate::owner::PromptRunner;
use crate::paths::QueuePaths;
use crate::queue::protocol::{ErrorBody, PromptResultBody, QueueResponse};
use crate::queue::server::PromptTask;
use crate::turn::{ControlFallback, PromptController, TurnController};

/// Temp-directory queue context. Keeps the `TempDir` alive for the test's
/// duration.
pub struct PathsCtx {
    pub paths: QueuePaths,
    _dir: tempfile::TempDir,
}

/// Create a fresh `~/.acpx`-shaped directory tree under a temp dir.
pub fn temp_paths() -> PathsCtx {
    #[allow(clippy::expect_used)]
    let dir = tempfile::tempdir().expect("create temp dir");
    let paths = QueuePaths::with_base(dir.path().join(".acpx"));
    #[allow(clippy::expect_used)]
    paths.ensure_dirs().expect("create queue dirs");
    PathsCtx { paths, _dir: dir }
}

/// [`EventSink`] that records everything it receives.
#[derive(Default)]
pub struct CollectingSink {
    pub updates: Vec<Value>,
    pub client_ops: Vec<Value>,
    pub done: Vec<String>,
    pub results: Vec<PromptResultBody>,
    pub errors: Vec<ErrorBody>,
}

impl EventSink for CollectingSink {
    fn on_update(&mut self, notification: &Value) {
        self.updates.push(notification.clone());
    }

    fn on_client_operation(&mut self, operation: &Value) {
        self.client_ops.push(operation.clone());
    }

    fn on_done(&mut self, stop_reason: &str) {
        self.done.push(stop_reason.to_owned());
    }

    fn on_result(&mut self, result: &PromptResultBody) {
        self.results.push(result.clone());
    }

    fn on_error(&mut self, error: &ErrorBody) {
        self.errors.push(error.clone());
    }
}

/// Scripted [`PromptRunner`]: streams a fixed number of updates, optionally
/// stalls so cancels can interleave, then completes. The turn goes through
/// the same controller handshake as the production runner.
pub struct ScriptedRunner {
    pub updates_per_turn: usize,
    /// Pause before completing, giving tests a window to deliver cancels.
    pub stall: Option<Duration>,
    /// Stop reason reported when no cancel was delivered.
    pub stop_reason: String,
    pub controller: Rc<ScriptedController>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self {
            updates_per_turn: 1,
            stall: None,
            stop_reason: "end_turn".to_owned(),
            controller: Rc::new(ScriptedController::default()),
        }
    }
}

#[async_trait(?Send)]
impl PromptRunner for ScriptedRunner {
    async fn run_prompt(
        &self,
        task: &PromptTask,
        turn: &Rc<TurnController>,
    ) -> Result<PromptResultBody, QueueError> {
        let started = std::time::Instant::now();
        turn.set_active_controller(self.controller.clone()).await;
        turn.mark_prompt_active().await;

        for i in 0..self.updates_per_turn {
            let _ = task
                .replies
                .send(QueueResponse::SessionUpdate {
                    request_id: task.request_id.clone(),
                    notification: json!({
                        "sessionId": "scripted",
                        "update": {
                            "sessionUpdate": "agent_message_chunk",
                            "content": {"type": "text", "text": format!("chunk {i}")},
                        },
                    }),
                })
                .await;
        }
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }

        turn.clear_active_controller();
        let stop_reason = if self.controller.cancels() > 0 {
            "cancelled".to_owned()
        } else {
            self.stop_reason.clone()
        };
        Ok(PromptResultBody {
            stop_reason,
            duration_ms: started.elapsed().as_millis() as u64,
            update_count: self.updates_per_turn as u64,
            permission_denied: false,
        })
    }
}

/// [`PromptController`] + [`ControlFallback`] double that records calls.
#[derive(Default)]
pub struct ScriptedController {
    cancels: RefCell<u32>,
    pub modes: RefCell<Vec<String>>,
    pub config_options: RefCell<Vec<(String, Value)>>,
    /// When set, cancel calls fail with this message.
    pub fail_cancel: RefCell<Option<String>>,
}

impl ScriptedController {
    pub fn cancels(&self) -> u32 {
        *self.cancels.borrow()
    }
}

#[async_trait(?Send)]
impl PromptController for ScriptedController {
    async fn cancel(&self) -> Result<(), QueueError> {
        if let Some(message) = self.fail_cancel.borrow().clone() {
            return Err(QueueError::control_failed(
                crate::error::ErrorOrigin::Agent,
                message,
                None,
            ));
        }
        *self.cancels.borrow_mut() += 1;
        Ok(())
    }

    async fn set_mode(&self, mode_id: &str) -> Result<(), QueueError> {
        self.modes.borrow_mut().push(mode_id.to_owned());
        Ok(())
    }

    async fn set_config_option(&self, config_id: &str, value: Value) -> Result<Value, QueueError> {
        self.config_options.borrow_mut().push((config_id.to_owned(), value.clone()));
        Ok(json!({"configId": config_id, "value": value}))
    }
}

#[async_trait(?Send)]
impl ControlFallback for ScriptedController {
    async fn set_mode(&self, mode_id: &str) -> Result<(), QueueError> {
        self.modes.borrow_mut().push(mode_id.to_owned());
        Ok(())
    }

    async fn set_config_option(&self, config_id: &str, value: Value) -> Result<Value, QueueError> {
        self.config_options.borrow_mut().push((config_id.to_owned(), value.clone()));
        Ok(json!({"configId": config_id, "value": value}))
    }
}
