// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-delimited JSON envelope spoken over the queue socket.
//!
//! One UTF-8 JSON object per line. Requests carry a caller-chosen
//! `requestId`; every owner message echoes it. A control request yields
//! exactly `accepted` then one terminal message; a prompt yields
//! `accepted · (session_update | client_operation)* · (done · result | error)`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{DetailCode, ErrorOrigin, QueueError};
use crate::permissions::PermissionAnswer;

/// Upper bound on a single frame. Prompt bodies up to 200 KiB must fit with
/// envelope overhead to spare.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Body of a `submit_prompt` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSubmission {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_interactive_permissions: Option<PermissionAnswer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub suppress_sdk_console_errors: bool,
    pub wait_for_completion: bool,
}

/// Requests a client may send to the owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueRequest {
    #[serde(rename_all = "camelCase")]
    SubmitPrompt {
        request_id: String,
        #[serde(flatten)]
        submission: PromptSubmission,
    },
    #[serde(rename_all = "camelCase")]
    CancelPrompt { request_id: String },
    #[serde(rename_all = "camelCase")]
    SetMode {
        request_id: String,
        mode_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    SetConfigOption {
        request_id: String,
        config_id: String,
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
}

impl QueueRequest {
    pub fn request_id(&self) -> &str {
        match self {
            Self::SubmitPrompt { request_id, .. }
            | Self::CancelPrompt { request_id }
            | Self::SetMode { request_id, .. }
            | Self::SetConfigOption { request_id, .. } => request_id,
        }
    }
}

/// Final payload of a completed prompt turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResultBody {
    pub stop_reason: String,
    pub duration_ms: u64,
    pub update_count: u64,
    #[serde(default)]
    pub permission_denied: bool,
}

/// Wire form of a [`QueueError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub detail_code: String,
    pub origin: ErrorOrigin,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acp: Option<Value>,
}

impl From<&QueueError> for ErrorBody {
    fn from(err: &QueueError) -> Self {
        let acp = match err {
            QueueError::Runtime { acp, .. } => acp.clone(),
            _ => None,
        };
        Self {
            code: err.kind_str().to_owned(),
            detail_code: err
                .detail()
                .map(|d| d.as_str().to_owned())
                .unwrap_or_else(|| DetailCode::RuntimePromptFailed.as_str().to_owned()),
            origin: err.origin(),
            message: err.to_string(),
            retryable: err.retryable(),
            acp,
        }
    }
}

impl ErrorBody {
    /// Reconstruct an in-process error on the client side.
    pub fn into_error(self) -> QueueError {
        let detail =
            DetailCode::parse(&self.detail_code).unwrap_or(DetailCode::RuntimePromptFailed);
        match self.code.as_str() {
            "connection" => QueueError::Connection { detail, message: self.message },
            "protocol" => QueueError::Protocol { detail, message: self.message },
            _ => QueueError::Runtime {
                detail,
                origin: self.origin,
                message: self.message,
                retryable: self.retryable,
                acp: self.acp,
            },
        }
    }
}

/// Messages the owner writes back on a task's connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueResponse {
    #[serde(rename_all = "camelCase")]
    Accepted { request_id: String },
    #[serde(rename_all = "camelCase")]
    SessionUpdate { request_id: String, notification: Value },
    #[serde(rename_all = "camelCase")]
    ClientOperation { request_id: String, operation: Value },
    #[serde(rename_all = "camelCase")]
    Done { request_id: String, stop_reason: String },
    #[serde(rename_all = "camelCase")]
    Result { request_id: String, result: PromptResultBody },
    #[serde(rename_all = "camelCase")]
    CancelResult { request_id: String, cancelled: bool },
    #[serde(rename_all = "camelCase")]
    SetModeResult { request_id: String },
    #[serde(rename_all = "camelCase")]
    SetConfigOptionResult { request_id: String, response: Value },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(flatten)]
        body: ErrorBody,
    },
}

impl QueueResponse {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Accepted { request_id }
            | Self::SessionUpdate { request_id, .. }
            | Self::ClientOperation { request_id, .. }
            | Self::Done { request_id, .. }
            | Self::Result { request_id, .. }
            | Self::CancelResult { request_id, .. }
            | Self::SetModeResult { request_id }
            | Self::SetConfigOptionResult { request_id, .. } => Some(request_id),
            Self::Error { request_id, .. } => request_id.as_deref(),
        }
    }

    pub fn error_for(request_id: impl Into<String>, err: &QueueError) -> Self {
        Self::Error { request_id: Some(request_id.into()), body: err.into() }
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Write one message as a single newline-terminated JSON line.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message).map_err(std::io::Error::other)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

/// Read one line into `buf`. Returns `None` on a clean EOF, the trimmed line
/// otherwise. Oversized lines are a protocol error.
pub async fn read_frame<'a, R>(
    reader: &mut R,
    buf: &'a mut String,
) -> std::io::Result<Option<&'a str>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = reader.read_line(buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if n > MAX_LINE_BYTES {
        return Err(std::io::Error::other(format!(
            "frame of {n} bytes exceeds the {MAX_LINE_BYTES}-byte limit"
        )));
    }
    Ok(Some(buf.trim_end_matches(['\r', '\n'])))
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
