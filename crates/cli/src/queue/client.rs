// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Foreground-side queue client.
//!
//! Each entry point first checks the lease; a missing or dead owner returns
//! `Ok(None)`, telling the caller to fall back to spawn-or-attach. A live
//! owner is dialed with bounded retries, then the request is written and
//! line-delimited responses are consumed until a terminal message.

use std::time::Duration;

use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DetailCode, QueueError};
use crate::lease::{self, Lease};
use crate::output::EventSink;
use crate::paths::QueuePaths;
use crate::queue::protocol::{
    self, PromptResultBody, PromptSubmission, QueueRequest, QueueResponse,
};

pub const CONNECT_ATTEMPTS: u32 = 40;
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Outcome of a prompt submitted to a live owner.
#[derive(Debug)]
pub enum PromptOutcome {
    /// `waitForCompletion=false`: accepted and left running on the owner.
    Queued { request_id: String },
    /// The turn ran to a terminal `done` + `result` pair.
    Completed { stop_reason: String, result: PromptResultBody },
}

/// Submit a prompt to a running owner, streaming updates into `sink`.
///
/// `Ok(None)` means no usable owner exists and the caller should spawn one.
pub async fn try_submit_to_running_owner(
    paths: &QueuePaths,
    session_id: &str,
    submission: PromptSubmission,
    sink: &mut dyn EventSink,
) -> Result<Option<PromptOutcome>, QueueError> {
    let Some(stream) = connect_to_owner(paths, session_id).await? else {
        return Ok(None);
    };
    let request_id = Uuid::new_v4().to_string();
    run_prompt_exchange(stream, request_id, submission, sink).await.map(Some)
}

/// Request cancellation of the in-flight (or queued) prompt.
pub async fn try_cancel_on_running_owner(
    paths: &QueuePaths,
    session_id: &str,
) -> Result<Option<bool>, QueueError> {
    let Some(stream) = connect_to_owner(paths, session_id).await? else {
        return Ok(None);
    };
    let request_id = Uuid::new_v4().to_string();
    let request = QueueRequest::CancelPrompt { request_id };
    match run_control_exchange(stream, request).await? {
        ControlReply::Cancel(cancelled) => Ok(Some(cancelled)),
        other => Err(unexpected_reply(&other)),
    }
}

/// Switch the session mode on a running owner.
pub async fn try_set_mode_on_running_owner(
    paths: &QueuePaths,
    session_id: &str,
    mode_id: &str,
    timeout_ms: Option<u64>,
) -> Result<Option<()>, QueueError> {
    let Some(stream) = connect_to_owner(paths, session_id).await? else {
        return Ok(None);
    };
    let request_id = Uuid::new_v4().to_string();
    let request =
        QueueRequest::SetMode { request_id, mode_id: mode_id.to_owned(), timeout_ms };
    match run_control_exchange(stream, request).await? {
        ControlReply::SetMode => Ok(Some(())),
        other => Err(unexpected_reply(&other)),
    }
}

/// Set a session config option on a running owner.
pub async fn try_set_config_option_on_running_owner(
    paths: &QueuePaths,
    session_id: &str,
    config_id: &str,
    value: Value,
    timeout_ms: Option<u64>,
) -> Result<Option<Value>, QueueError> {
    let Some(stream) = connect_to_owner(paths, session_id).await? else {
        return Ok(None);
    };
    let request_id = Uuid::new_v4().to_string();
    let request = QueueRequest::SetConfigOption {
        request_id,
        config_id: config_id.to_owned(),
        value,
        timeout_ms,
    };
    match run_control_exchange(stream, request).await? {
        ControlReply::SetConfigOption(response) => Ok(Some(response)),
        other => Err(unexpected_reply(&other)),
    }
}

// ---------------------------------------------------------------------------
// Connection establishment
// ---------------------------------------------------------------------------

/// Dial the owner named by the lease. `Ok(None)` when there is no live
/// owner; retries only on not-found / connection-refused, and gives up
/// early if the owner's pid dies mid-retry.
async fn connect_to_owner(
    paths: &QueuePaths,
    session_id: &str,
) -> Result<Option<UnixStream>, QueueError> {
    let Some(lease) = read_lease(paths, session_id)? else {
        return Ok(None);
    };
    if !lease_usable(paths, &lease)? {
        return Ok(None);
    }
    if lease.is_stale() {
        debug!(session_id, pid = lease.pid, "lease heartbeat is stale, pid still alive");
    }
    for _ in 0..CONNECT_ATTEMPTS {
        if !lease::pid_alive(lease.pid) {
            return Ok(None);
        }
        match UnixStream::connect(&lease.socket_path).await {
            Ok(stream) => return Ok(Some(stream)),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                ) =>
            {
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(e) => {
                return Err(QueueError::not_accepting(format!(
                    "failed to connect to queue owner: {e}"
                )));
            }
        }
    }
    Err(QueueError::not_accepting("queue owner did not accept a connection"))
}

fn read_lease(paths: &QueuePaths, session_id: &str) -> Result<Option<Lease>, QueueError> {
    lease::read(paths, session_id)
        .map_err(|e| QueueError::not_accepting(format!("failed to read lease: {e}")))
}

fn lease_usable(paths: &QueuePaths, lease: &Lease) -> Result<bool, QueueError> {
    lease::ensure_usable(paths, lease)
        .map_err(|e| QueueError::not_accepting(format!("failed to probe lease: {e}")))
}

// ---------------------------------------------------------------------------
// Exchanges
// ---------------------------------------------------------------------------

async fn run_prompt_exchange(
    stream: UnixStream,
    request_id: String,
    submission: PromptSubmission,
    sink: &mut dyn EventSink,
) -> Result<PromptOutcome, QueueError> {
    let wait_for_completion = submission.wait_for_completion;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let request = QueueRequest::SubmitPrompt { request_id: request_id.clone(), submission };
    protocol::write_message(&mut write_half, &request).await.map_err(|e| {
        QueueError::connection(
            DetailCode::DisconnectedBeforeAck,
            format!("failed to send prompt: {e}"),
        )
    })?;

    let mut accepted = false;
    let mut done_stop_reason: Option<String> = None;
    let mut line = String::new();
    loop {
        let disconnect_detail = if accepted {
            DetailCode::DisconnectedBeforeCompletion
        } else {
            DetailCode::DisconnectedBeforeAck
        };
        let frame = protocol::read_frame(&mut reader, &mut line)
            .await
            .map_err(|e| QueueError::connection(disconnect_detail, e.to_string()))?;
        let Some(text) = frame else {
            if accepted && !wait_for_completion {
                return Ok(PromptOutcome::Queued { request_id });
            }
            return Err(QueueError::connection(
                disconnect_detail,
                "queue owner closed the connection",
            ));
        };
        match parse_response(text)? {
            QueueResponse::Accepted { request_id: rid } => {
                check_request_id(&rid, &request_id)?;
                accepted = true;
                if !wait_for_completion {
                    return Ok(PromptOutcome::Queued { request_id });
                }
            }
            QueueResponse::SessionUpdate { request_id: rid, notification } => {
                if rid == request_id {
                    sink.on_update(&notification);
                }
            }
            QueueResponse::ClientOperation { request_id: rid, operation } => {
                if rid == request_id {
                    sink.on_client_operation(&operation);
                }
            }
            QueueResponse::Done { request_id: rid, stop_reason } => {
                check_request_id(&rid, &request_id)?;
                sink.on_done(&stop_reason);
                done_stop_reason = Some(stop_reason);
            }
            QueueResponse::Result { request_id: rid, result } => {
                check_request_id(&rid, &request_id)?;
                sink.on_result(&result);
                let stop_reason =
                    done_stop_reason.unwrap_or_else(|| result.stop_reason.clone());
                return Ok(PromptOutcome::Completed { stop_reason, result });
            }
            QueueResponse::Error { body, .. } => {
                return Err(body.into_error());
            }
            QueueResponse::CancelResult { .. }
            | QueueResponse::SetModeResult { .. }
            | QueueResponse::SetConfigOptionResult { .. } => {
                return Err(QueueError::protocol(
                    DetailCode::ProtocolUnexpectedResponse,
                    "control result on a prompt stream",
                ));
            }
        }
    }
}

enum ControlReply {
    Cancel(bool),
    SetMode,
    SetConfigOption(Value),
}

impl ControlReply {
    fn kind(&self) -> &'static str {
        match self {
            Self::Cancel(_) => "cancel_result",
            Self::SetMode => "set_mode_result",
            Self::SetConfigOption(_) => "set_config_option_result",
        }
    }
}

/// Drive a control request through its `accepted` + terminal pair.
async fn run_control_exchange(
    stream: UnixStream,
    request: QueueRequest,
) -> Result<ControlReply, QueueError> {
    let request_id = request.request_id().to_owned();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    protocol::write_message(&mut write_half, &request).await.map_err(|e| {
        QueueError::connection(
            DetailCode::DisconnectedBeforeAck,
            format!("failed to send control request: {e}"),
        )
    })?;

    let mut accepted = false;
    let mut line = String::new();
    loop {
        let disconnect_detail = if accepted {
            DetailCode::DisconnectedBeforeCompletion
        } else {
            DetailCode::DisconnectedBeforeAck
        };
        let frame = protocol::read_frame(&mut reader, &mut line)
            .await
            .map_err(|e| QueueError::connection(disconnect_detail, e.to_string()))?;
        let Some(text) = frame else {
            return Err(QueueError::connection(
                disconnect_detail,
                "queue owner closed the connection",
            ));
        };
        match parse_response(text)? {
            QueueResponse::Accepted { request_id: rid } => {
                check_request_id(&rid, &request_id)?;
                accepted = true;
            }
            QueueResponse::CancelResult { request_id: rid, cancelled } => {
                check_request_id(&rid, &request_id)?;
                return Ok(ControlReply::Cancel(cancelled));
            }
            QueueResponse::SetModeResult { request_id: rid } => {
                check_request_id(&rid, &request_id)?;
                return Ok(ControlReply::SetMode);
            }
            QueueResponse::SetConfigOptionResult { request_id: rid, response } => {
                check_request_id(&rid, &request_id)?;
                return Ok(ControlReply::SetConfigOption(response));
            }
            QueueResponse::Error { body, .. } => {
                return Err(body.into_error());
            }
            QueueResponse::SessionUpdate { .. }
            | QueueResponse::ClientOperation { .. }
            | QueueResponse::Done { .. }
            | QueueResponse::Result { .. } => {
                return Err(QueueError::protocol(
                    DetailCode::ProtocolUnexpectedResponse,
                    "prompt stream message on a control request",
                ));
            }
        }
    }
}

fn parse_response(text: &str) -> Result<QueueResponse, QueueError> {
    serde_json::from_str(text).map_err(|e| {
        QueueError::protocol(
            DetailCode::ProtocolMalformedMessage,
            format!("unparseable owner response: {e}"),
        )
    })
}

fn check_request_id(received: &str, expected: &str) -> Result<(), QueueError> {
    if received == expected {
        Ok(())
    } else {
        Err(QueueError::protocol(
            DetailCode::ProtocolMalformedMessage,
            format!("mismatched requestId: expected {expected}, got {received}"),
        ))
    }
}

fn unexpected_reply(reply: &ControlReply) -> QueueError {
    QueueError::protocol(
        DetailCode::ProtocolUnexpectedResponse,
        format!("unexpected terminal {} for this control request", reply.kind()),
    )
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
