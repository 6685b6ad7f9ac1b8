// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Non-interactive answers to agent permission requests.
//!
//! acpx is headless: there is nobody to click a button when the adapter asks
//! for permission mid-turn, so every request is answered from a fixed policy.
//! A denial is remembered for the duration of the turn and surfaces as the
//! permission-denied terminal outcome (exit code 2).

use std::cell::Cell;

use agent_client_protocol as acp;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fixed answer applied to every `session/request_permission`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum PermissionAnswer {
    /// Pick an allow-once option (or the first offered one).
    Allow,
    /// Pick a reject-once option, or cancel the request outright.
    #[default]
    Deny,
}

/// Per-owner permission responder. Lives on the owner's local task set.
pub struct PermissionPolicy {
    answer: Cell<PermissionAnswer>,
    denied: Cell<bool>,
}

impl PermissionPolicy {
    pub fn new(answer: PermissionAnswer) -> Self {
        Self { answer: Cell::new(answer), denied: Cell::new(false) }
    }

    /// Replace the answer for subsequent requests (prompts carry their own
    /// `nonInteractivePermissions`).
    pub fn set_answer(&self, answer: PermissionAnswer) {
        self.answer.set(answer);
    }

    /// Whether any request was denied since the last [`reset`](Self::reset).
    pub fn denied(&self) -> bool {
        self.denied.get()
    }

    /// Clear the denial marker at the start of a turn.
    pub fn reset(&self) {
        self.denied.set(false);
    }

    /// Choose an outcome for a permission request.
    pub fn decide(&self, request: &acp::RequestPermissionRequest) -> acp::RequestPermissionOutcome {
        match self.answer.get() {
            PermissionAnswer::Allow => {
                let option_id = request
                    .options
                    .iter()
                    .find(|opt| matches!(opt.kind, acp::PermissionOptionKind::AllowOnce))
                    .or_else(|| request.options.first())
                    .map(|opt| opt.option_id.clone());
                match option_id {
                    Some(id) => acp::RequestPermissionOutcome::Selected(
                        acp::SelectedPermissionOutcome::new(id),
                    ),
                    None => acp::RequestPermissionOutcome::Cancelled,
                }
            }
            PermissionAnswer::Deny => {
                self.denied.set(true);
                debug!(
                    tool_call_id = %request.tool_call.tool_call_id,
                    "denying permission request"
                );
                let option_id = request
                    .options
                    .iter()
                    .find(|opt| matches!(opt.kind, acp::PermissionOptionKind::RejectOnce))
                    .map(|opt| opt.option_id.clone());
                match option_id {
                    Some(id) => acp::RequestPermissionOutcome::Selected(
                        acp::SelectedPermissionOutcome::new(id),
                    ),
                    None => acp::RequestPermissionOutcome::Cancelled,
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "permissions_tests.rs"]
mod tests;
