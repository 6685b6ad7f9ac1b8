// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unified error model shared by the queue client, the queue server, and the
//! owner runtime.
//!
//! Every owner-to-client failure travels as a terminal `error` wire message
//! carrying a machine-readable detail code; [`QueueError`] is the in-process
//! form on both ends.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Which half of the system produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorOrigin {
    /// The queue layer itself (transport, framing, lease).
    Queue,
    /// The owner runtime while executing a task.
    Runtime,
    /// The agent adapter, relayed through the owner.
    Agent,
}

impl ErrorOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Runtime => "runtime",
            Self::Agent => "agent",
        }
    }
}

impl std::fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable detail codes carried on wire errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailCode {
    ProtocolInvalidJson,
    ProtocolMalformedMessage,
    ProtocolUnexpectedResponse,
    DisconnectedBeforeAck,
    DisconnectedBeforeCompletion,
    NotAcceptingRequests,
    RuntimePromptFailed,
    RuntimeControlFailed,
}

impl DetailCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProtocolInvalidJson => "QUEUE_PROTOCOL_INVALID_JSON",
            Self::ProtocolMalformedMessage => "QUEUE_PROTOCOL_MALFORMED_MESSAGE",
            Self::ProtocolUnexpectedResponse => "QUEUE_PROTOCOL_UNEXPECTED_RESPONSE",
            Self::DisconnectedBeforeAck => "QUEUE_DISCONNECTED_BEFORE_ACK",
            Self::DisconnectedBeforeCompletion => "QUEUE_DISCONNECTED_BEFORE_COMPLETION",
            Self::NotAcceptingRequests => "QUEUE_NOT_ACCEPTING_REQUESTS",
            Self::RuntimePromptFailed => "QUEUE_RUNTIME_PROMPT_FAILED",
            Self::RuntimeControlFailed => "QUEUE_RUNTIME_CONTROL_FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUE_PROTOCOL_INVALID_JSON" => Some(Self::ProtocolInvalidJson),
            "QUEUE_PROTOCOL_MALFORMED_MESSAGE" => Some(Self::ProtocolMalformedMessage),
            "QUEUE_PROTOCOL_UNEXPECTED_RESPONSE" => Some(Self::ProtocolUnexpectedResponse),
            "QUEUE_DISCONNECTED_BEFORE_ACK" => Some(Self::DisconnectedBeforeAck),
            "QUEUE_DISCONNECTED_BEFORE_COMPLETION" => Some(Self::DisconnectedBeforeCompletion),
            "QUEUE_NOT_ACCEPTING_REQUESTS" => Some(Self::NotAcceptingRequests),
            "QUEUE_RUNTIME_PROMPT_FAILED" => Some(Self::RuntimePromptFailed),
            "QUEUE_RUNTIME_CONTROL_FAILED" => Some(Self::RuntimeControlFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DetailCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a queue operation, on either side of the socket.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Transport-level failure talking to the owner.
    #[error("{message}")]
    Connection { detail: DetailCode, message: String },

    /// The peer violated the line protocol.
    #[error("{message}")]
    Protocol { detail: DetailCode, message: String },

    /// A blocking call exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The user interrupted a foreground call.
    #[error("interrupted")]
    Interrupted,

    /// The owner or the agent adapter failed while executing a task.
    #[error("{message}")]
    Runtime {
        detail: DetailCode,
        origin: ErrorOrigin,
        message: String,
        retryable: bool,
        acp: Option<Value>,
    },
}

impl QueueError {
    pub fn connection(detail: DetailCode, message: impl Into<String>) -> Self {
        Self::Connection { detail, message: message.into() }
    }

    pub fn protocol(detail: DetailCode, message: impl Into<String>) -> Self {
        Self::Protocol { detail, message: message.into() }
    }

    /// The "owner is going away" error used for submissions during shutdown
    /// and for spawn-or-attach deadline expiry.
    pub fn not_accepting(message: impl Into<String>) -> Self {
        Self::Connection { detail: DetailCode::NotAcceptingRequests, message: message.into() }
    }

    pub fn prompt_failed(
        origin: ErrorOrigin,
        message: impl Into<String>,
        acp: Option<Value>,
    ) -> Self {
        Self::Runtime {
            detail: DetailCode::RuntimePromptFailed,
            origin,
            message: message.into(),
            retryable: true,
            acp,
        }
    }

    pub fn control_failed(
        origin: ErrorOrigin,
        message: impl Into<String>,
        acp: Option<Value>,
    ) -> Self {
        Self::Runtime {
            detail: DetailCode::RuntimeControlFailed,
            origin,
            message: message.into(),
            retryable: false,
            acp,
        }
    }

    /// Error kind tag carried in the wire `code` field.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Protocol { .. } => "protocol",
            Self::Timeout(_) => "timeout",
            Self::Interrupted => "interrupted",
            Self::Runtime { .. } => "runtime",
        }
    }

    pub fn detail(&self) -> Option<DetailCode> {
        match self {
            Self::Connection { detail, .. }
            | Self::Protocol { detail, .. }
            | Self::Runtime { detail, .. } => Some(*detail),
            Self::Timeout(_) | Self::Interrupted => None,
        }
    }

    pub fn origin(&self) -> ErrorOrigin {
        match self {
            Self::Runtime { origin, .. } => *origin,
            _ => ErrorOrigin::Queue,
        }
    }

    /// Whether the caller may re-enter spawn-or-attach with this error.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Connection { detail, .. } => matches!(
                detail,
                DetailCode::DisconnectedBeforeAck
                    | DetailCode::DisconnectedBeforeCompletion
                    | DetailCode::NotAcceptingRequests
            ),
            Self::Runtime { retryable, .. } => *retryable,
            Self::Protocol { .. } | Self::Timeout(_) | Self::Interrupted => false,
        }
    }

    /// Process exit code for a foreground invocation ending in this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Timeout(_) => 124,
            Self::Interrupted => 130,
            _ => 1,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
