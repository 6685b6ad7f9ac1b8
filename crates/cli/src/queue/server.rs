// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Owner-side queue server.
//!
//! Accepts connections on the session socket, validates requests, and routes
//! them: prompt submissions enter a bounded FIFO consumed by the owner's
//! main loop, while cancel / set-mode / set-config requests are dispatched
//! straight onto the turn controller so they stay coincident with the
//! active turn instead of queueing behind it.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DetailCode, QueueError};
use crate::queue::protocol::{self, PromptSubmission, QueueRequest, QueueResponse};
use crate::turn::TurnController;

/// Bound on prompts waiting in the FIFO.
pub const PROMPT_QUEUE_CAPACITY: usize = 64;

/// A validated prompt submission waiting for (or holding) the turn.
pub struct PromptTask {
    pub request_id: String,
    pub submission: PromptSubmission,
    /// Back-reference to the submitting connection; responses for this task
    /// are funnelled through it. Send errors mean the client went away and
    /// are ignored.
    pub replies: mpsc::Sender<QueueResponse>,
}

/// Gauge counting waiting prompts plus the executing one; reported in the
/// lease heartbeat.
#[derive(Clone, Default)]
pub struct QueueDepth {
    waiting: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
}

impl QueueDepth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueued(&self) {
        self.waiting.fetch_add(1, Ordering::Relaxed);
    }

    /// A task left the FIFO and started executing.
    pub fn started(&self) {
        self.waiting.fetch_sub(1, Ordering::Relaxed);
        self.running.store(true, Ordering::Relaxed);
    }

    pub fn finished(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// A task left the FIFO without ever executing (shutdown drain).
    pub fn abandoned(&self) {
        self.waiting.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn current(&self) -> u32 {
        let waiting = self.waiting.load(Ordering::Relaxed) as u32;
        waiting + u32::from(self.running.load(Ordering::Relaxed))
    }
}

/// Shared context handed to every connection task.
#[derive(Clone)]
pub struct ServerCtx {
    pub turn: Rc<TurnController>,
    pub prompt_tx: mpsc::Sender<PromptTask>,
    pub depth: QueueDepth,
}

pub struct QueueServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl QueueServer {
    /// Bind the session socket, replacing any stale file left by a dead
    /// owner. Only the lease holder may call this.
    pub fn bind(socket_path: &Path) -> std::io::Result<Self> {
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)?;
        Ok(Self { listener, socket_path: socket_path.to_path_buf() })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept-loop. Each connection runs as its own local task; the loop
    /// ends when `shutdown` fires.
    pub async fn run(self, ctx: ServerCtx, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accept = self.listener.accept() => {
                    match accept {
                        Ok((stream, _)) => {
                            let ctx = ctx.clone();
                            tokio::task::spawn_local(async move {
                                if let Err(e) = handle_connection(stream, ctx).await {
                                    debug!("queue connection ended: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            warn!("queue accept error: {e}");
                        }
                    }
                }
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, ctx: ServerCtx) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // All responses for this connection funnel through one channel so
    // interleaved tasks cannot tear each other's lines.
    let (reply_tx, mut reply_rx) = mpsc::channel::<QueueResponse>(64);
    let writer = tokio::task::spawn_local(async move {
        while let Some(message) = reply_rx.recv().await {
            if protocol::write_message(&mut write_half, &message).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut line = String::new();
    loop {
        let Some(text) = protocol::read_frame(&mut reader, &mut line).await? else {
            break;
        };
        if text.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<QueueRequest>(text) {
            Ok(request) => dispatch_request(request, &ctx, &reply_tx).await,
            Err(_) => {
                // Tell invalid JSON apart from a well-formed object of the
                // wrong shape, then close: framing is no longer trustworthy.
                let (detail, request_id) = match serde_json::from_str::<serde_json::Value>(text) {
                    Ok(value) => (
                        DetailCode::ProtocolMalformedMessage,
                        value
                            .get("requestId")
                            .and_then(|v| v.as_str())
                            .map(str::to_owned),
                    ),
                    Err(_) => (DetailCode::ProtocolInvalidJson, None),
                };
                let err = QueueError::protocol(detail, "unparseable queue request");
                let _ = reply_tx
                    .send(QueueResponse::Error { request_id, body: (&err).into() })
                    .await;
                break;
            }
        }
    }

    drop(reply_tx);
    let _ = writer.await;
    Ok(())
}

async fn dispatch_request(
    request: QueueRequest,
    ctx: &ServerCtx,
    reply_tx: &mpsc::Sender<QueueResponse>,
) {
    match request {
        QueueRequest::SubmitPrompt { request_id, submission } => {
            if ctx.turn.is_closing() {
                let err = QueueError::not_accepting("queue owner is closing");
                let _ = reply_tx.send(QueueResponse::error_for(request_id, &err)).await;
                return;
            }
            let _ = reply_tx.send(QueueResponse::Accepted { request_id: request_id.clone() }).await;
            ctx.depth.enqueued();
            let task = PromptTask { request_id: request_id.clone(), submission, replies: reply_tx.clone() };
            if ctx.prompt_tx.send(task).await.is_err() {
                ctx.depth.abandoned();
                let err = QueueError::not_accepting("queue owner is shutting down");
                let _ = reply_tx.send(QueueResponse::error_for(request_id, &err)).await;
            }
        }
        QueueRequest::CancelPrompt { request_id } => {
            let _ = reply_tx.send(QueueResponse::Accepted { request_id: request_id.clone() }).await;
            let turn = ctx.turn.clone();
            let reply_tx = reply_tx.clone();
            tokio::task::spawn_local(async move {
                let cancelled = turn.request_cancel(&request_id).await;
                let _ = reply_tx.send(QueueResponse::CancelResult { request_id, cancelled }).await;
            });
        }
        QueueRequest::SetMode { request_id, mode_id, timeout_ms } => {
            let _ = reply_tx.send(QueueResponse::Accepted { request_id: request_id.clone() }).await;
            let turn = ctx.turn.clone();
            let reply_tx = reply_tx.clone();
            tokio::task::spawn_local(async move {
                let message = match turn.set_session_mode(&mode_id, timeout_ms).await {
                    Ok(()) => QueueResponse::SetModeResult { request_id },
                    Err(e) => QueueResponse::error_for(request_id, &e),
                };
                let _ = reply_tx.send(message).await;
            });
        }
        QueueRequest::SetConfigOption { request_id, config_id, value, timeout_ms } => {
            let _ = reply_tx.send(QueueResponse::Accepted { request_id: request_id.clone() }).await;
            let turn = ctx.turn.clone();
            let reply_tx = reply_tx.clone();
            tokio::task::spawn_local(async move {
                let message =
                    match turn.set_session_config_option(&config_id, value, timeout_ms).await {
                        Ok(response) => {
                            QueueResponse::SetConfigOptionResult { request_id, response }
                        }
                        Err(e) => QueueResponse::error_for(request_id, &e),
                    };
                let _ = reply_tx.send(message).await;
            });
        }
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
