// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Turn controller: serializes prompt turns against the agent adapter while
//! keeping cancel and session-control requests coincident with the turn.
//!
//! The `Starting` phase exists because a cancel may arrive between the
//! moment a prompt is sent over IPC and the moment the adapter acknowledges
//! it. In that window there is no active prompt to cancel, so the request is
//! accepted, recorded, and delivered as soon as a controller is installed
//! and the prompt goes active, or discarded if the turn ends first.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ErrorOrigin, QueueError};

/// Bound applied to adapter control calls when the request carries no
/// `timeoutMs` of its own.
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to the adapter-side prompt of the current turn. Installed by the
/// runtime once the adapter has accepted the prompt.
#[async_trait(?Send)]
pub trait PromptController {
    async fn cancel(&self) -> Result<(), QueueError>;
    async fn set_mode(&self, mode_id: &str) -> Result<(), QueueError>;
    async fn set_config_option(&self, config_id: &str, value: Value) -> Result<Value, QueueError>;
}

/// Target for session controls when no prompt turn is in flight. Points at
/// the most recent default session.
#[async_trait(?Send)]
pub trait ControlFallback {
    async fn set_mode(&self, mode_id: &str) -> Result<(), QueueError>;
    async fn set_config_option(&self, config_id: &str, value: Value) -> Result<Value, QueueError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Starting,
    Active,
    Closing,
}

/// Cancel accepted while no prompt was active yet.
#[derive(Debug, Clone)]
pub struct PendingCancel {
    pub request_id: String,
    pub recorded_at: Instant,
}

pub struct TurnController {
    phase: Cell<TurnPhase>,
    pending: RefCell<Option<PendingCancel>>,
    controller: RefCell<Option<Rc<dyn PromptController>>>,
    fallback: RefCell<Option<Rc<dyn ControlFallback>>>,
    /// At most one adapter-level cancel per turn; later cancels are
    /// acknowledged without re-invoking the adapter.
    cancel_delivered: Cell<bool>,
}

impl Default for TurnController {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnController {
    pub fn new() -> Self {
        Self {
            phase: Cell::new(TurnPhase::Idle),
            pending: RefCell::new(None),
            controller: RefCell::new(None),
            fallback: RefCell::new(None),
            cancel_delivered: Cell::new(false),
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase.get()
    }

    pub fn is_closing(&self) -> bool {
        self.phase.get() == TurnPhase::Closing
    }

    /// Install the fallback target for controls outside a turn.
    pub fn set_fallback(&self, fallback: Rc<dyn ControlFallback>) {
        *self.fallback.borrow_mut() = Some(fallback);
    }

    /// Enter `Starting` for a new prompt turn. Returns false when a turn is
    /// already in flight or the owner is closing.
    pub fn begin_turn(&self) -> bool {
        if self.phase.get() != TurnPhase::Idle {
            return false;
        }
        self.phase.set(TurnPhase::Starting);
        self.cancel_delivered.set(false);
        true
    }

    /// End the turn: drop the controller, discard any undelivered cancel,
    /// and return to `Idle` (unless closing).
    pub fn end_turn(&self) {
        *self.controller.borrow_mut() = None;
        if let Some(pending) = self.pending.borrow_mut().take() {
            debug!(request_id = %pending.request_id, "discarding pending cancel at turn end");
        }
        if self.phase.get() != TurnPhase::Closing {
            self.phase.set(TurnPhase::Idle);
        }
    }

    /// Enter `Closing`: all further cancels and controls are rejected.
    pub fn begin_closing(&self) {
        self.phase.set(TurnPhase::Closing);
    }

    /// Install the active controller and deliver any pending cancel.
    pub async fn set_active_controller(&self, controller: Rc<dyn PromptController>) {
        *self.controller.borrow_mut() = Some(controller);
        self.apply_pending_cancel().await;
    }

    pub fn clear_active_controller(&self) {
        *self.controller.borrow_mut() = None;
    }

    /// The adapter acknowledged the prompt: `Starting → Active`, then
    /// deliver any pending cancel.
    pub async fn mark_prompt_active(&self) {
        if self.phase.get() == TurnPhase::Starting {
            self.phase.set(TurnPhase::Active);
        }
        self.apply_pending_cancel().await;
    }

    fn has_active_prompt(&self) -> bool {
        self.phase.get() == TurnPhase::Active && self.controller.borrow().is_some()
    }

    /// Accept a cancel request. Returns false only when the owner is
    /// closing; before the prompt is active the cancel is recorded and
    /// deferred, and within one turn only the first cancel reaches the
    /// adapter.
    pub async fn request_cancel(&self, request_id: &str) -> bool {
        match self.phase.get() {
            TurnPhase::Closing => false,
            TurnPhase::Idle | TurnPhase::Starting => {
                self.record_pending(request_id);
                self.apply_pending_cancel().await;
                true
            }
            TurnPhase::Active => {
                if self.cancel_delivered.get() {
                    return true;
                }
                let controller = self.controller.borrow().clone();
                match controller {
                    Some(controller) => {
                        self.cancel_delivered.set(true);
                        match controller.cancel().await {
                            Ok(()) => true,
                            Err(e) => {
                                warn!("adapter cancel failed: {e}");
                                false
                            }
                        }
                    }
                    None => {
                        // Active but the runtime has not installed the
                        // controller yet; defer like in Starting.
                        self.record_pending(request_id);
                        true
                    }
                }
            }
        }
    }

    fn record_pending(&self, request_id: &str) {
        let mut pending = self.pending.borrow_mut();
        if pending.is_none() {
            *pending = Some(PendingCancel {
                request_id: request_id.to_owned(),
                recorded_at: Instant::now(),
            });
        }
    }

    /// Deliver a recorded cancel if there is an active prompt to deliver it
    /// to. Returns true iff the adapter call was made and succeeded.
    pub async fn apply_pending_cancel(&self) -> bool {
        if !self.has_active_prompt() || self.cancel_delivered.get() {
            return false;
        }
        let pending = self.pending.borrow_mut().take();
        let Some(pending) = pending else {
            return false;
        };
        let controller = self.controller.borrow().clone();
        let Some(controller) = controller else {
            return false;
        };
        self.cancel_delivered.set(true);
        debug!(
            request_id = %pending.request_id,
            deferred_for = ?pending.recorded_at.elapsed(),
            "delivering deferred cancel"
        );
        match controller.cancel().await {
            Ok(()) => true,
            Err(e) => {
                warn!("deferred adapter cancel failed: {e}");
                false
            }
        }
    }

    /// Route a set-mode request through the active controller, or the
    /// fallback session when no turn is in flight.
    pub async fn set_session_mode(
        &self,
        mode_id: &str,
        timeout_ms: Option<u64>,
    ) -> Result<(), QueueError> {
        if self.is_closing() {
            return Err(closing_error());
        }
        let timeout = control_timeout(timeout_ms);
        let controller = self.controller.borrow().clone();
        if let Some(controller) = controller {
            return with_timeout(timeout, controller.set_mode(mode_id)).await;
        }
        let fallback = self.fallback.borrow().clone();
        match fallback {
            Some(fallback) => with_timeout(timeout, fallback.set_mode(mode_id)).await,
            None => Err(QueueError::control_failed(
                ErrorOrigin::Runtime,
                "no session available for set-mode",
                None,
            )),
        }
    }

    /// Route a set-config-option request like [`set_session_mode`](Self::set_session_mode).
    pub async fn set_session_config_option(
        &self,
        config_id: &str,
        value: Value,
        timeout_ms: Option<u64>,
    ) -> Result<Value, QueueError> {
        if self.is_closing() {
            return Err(closing_error());
        }
        let timeout = control_timeout(timeout_ms);
        let controller = self.controller.borrow().clone();
        if let Some(controller) = controller {
            return with_timeout(timeout, controller.set_config_option(config_id, value)).await;
        }
        let fallback = self.fallback.borrow().clone();
        match fallback {
            Some(fallback) => {
                with_timeout(timeout, fallback.set_config_option(config_id, value)).await
            }
            None => Err(QueueError::control_failed(
                ErrorOrigin::Runtime,
                "no session available for set-config-option",
                None,
            )),
        }
    }
}

fn closing_error() -> QueueError {
    QueueError::not_accepting("queue owner is closing")
}

fn control_timeout(timeout_ms: Option<u64>) -> Duration {
    timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_CONTROL_TIMEOUT)
}

async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, QueueError>>,
) -> Result<T, QueueError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(QueueError::Timeout(timeout)),
    }
}

#[cfg(test)]
#[path = "turn_tests.rs"]
mod tests;
