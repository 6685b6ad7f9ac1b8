// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue-owner runtime.
//!
//! One process per session: acquires the lease (or exits 0), serves the
//! queue socket, heartbeats the lease every two seconds, and pops prompt
//! tasks one at a time through the turn controller. An empty queue for the
//! idle TTL ends the process; SIGINT/SIGTERM enter `closing` and drain
//! queued tasks with error responses before the lease is released.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use agent_client_protocol as acp;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{AgentClient, AgentConfig, AgentEvent};
use crate::error::{ErrorOrigin, QueueError};
use crate::lease::{self, Lease, HEARTBEAT_INTERVAL};
use crate::paths::QueuePaths;
use crate::permissions::{PermissionAnswer, PermissionPolicy};
use crate::queue::protocol::{PromptResultBody, QueueResponse};
use crate::queue::server::{PromptTask, QueueDepth, QueueServer, ServerCtx, PROMPT_QUEUE_CAPACITY};
use crate::record::{self, SessionRecord};
use crate::turn::{ControlFallback, PromptController, TurnController};

/// TTL applied when the caller does not specify one.
pub const DEFAULT_TTL_MS: u64 = 300_000;

/// Normalize a raw `--ttl-ms` value: absent or negative means the default,
/// zero disables the TTL entirely.
pub fn normalized_ttl(raw: Option<i64>) -> Option<Duration> {
    match raw {
        None => Some(Duration::from_millis(DEFAULT_TTL_MS)),
        Some(0) => None,
        Some(v) if v < 0 => Some(Duration::from_millis(DEFAULT_TTL_MS)),
        Some(v) => Some(Duration::from_millis(v as u64)),
    }
}

/// Settings for one owner process, resolved from the hidden subcommand.
#[derive(Debug, Clone)]
pub struct OwnerConfig {
    pub paths: QueuePaths,
    pub session_id: String,
    pub ttl: Option<Duration>,
    pub permission_mode: Option<String>,
    pub non_interactive_permissions: PermissionAnswer,
    pub auth_policy: Option<String>,
    pub suppress_sdk_console_errors: bool,
}

/// Executes one prompt task against the adapter, streaming updates through
/// the task's connection. Implemented by [`AgentRuntime`] in production and
/// by scripted runners in tests.
#[async_trait(?Send)]
pub trait PromptRunner {
    async fn run_prompt(
        &self,
        task: &PromptTask,
        turn: &Rc<TurnController>,
    ) -> Result<PromptResultBody, QueueError>;
}

/// Run a queue owner to completion. Returns the process exit code.
pub async fn run(config: OwnerConfig) -> anyhow::Result<i32> {
    let local = tokio::task::LocalSet::new();
    local.run_until(run_inner(config)).await
}

async fn run_inner(config: OwnerConfig) -> anyhow::Result<i32> {
    let Some(lease) = lease::try_acquire(&config.paths, &config.session_id)? else {
        info!(session_id = %config.session_id, "another process owns this session queue");
        return Ok(0);
    };
    info!(
        session_id = %config.session_id,
        ttl = ?config.ttl,
        auth_policy = ?config.auth_policy,
        "queue owner started"
    );
    let result = serve(&config, lease.clone()).await;
    lease::release(&config.paths, &lease);
    result
}

async fn serve(config: &OwnerConfig, lease: Lease) -> anyhow::Result<i32> {
    let record = record::load(&config.paths, &config.session_id)?.ok_or_else(|| {
        anyhow::anyhow!("no session record for {}", config.session_id)
    })?;

    let server = QueueServer::bind(&config.paths.socket_path(&config.session_id))?;
    let shutdown = CancellationToken::new();
    let turn = Rc::new(TurnController::new());
    let depth = QueueDepth::new();
    let (prompt_tx, mut prompt_rx) = mpsc::channel::<PromptTask>(PROMPT_QUEUE_CAPACITY);

    let permissions = Rc::new(PermissionPolicy::new(config.non_interactive_permissions));
    let runtime = Rc::new(AgentRuntime::new(config, record, permissions, config.paths.clone()));
    turn.set_fallback(runtime.clone());

    let ctx = ServerCtx { turn: turn.clone(), prompt_tx, depth: depth.clone() };
    tokio::task::spawn_local(server.run(ctx, shutdown.clone()));

    spawn_heartbeat(config.paths.clone(), lease, depth.clone(), shutdown.clone());
    spawn_signal_handler(shutdown.clone());

    run_queue_loop(
        turn.clone(),
        runtime.clone(),
        &mut prompt_rx,
        depth.clone(),
        config.ttl,
        shutdown.clone(),
    )
    .await;

    // Shutdown: reject everything still queued, then tear down the adapter.
    turn.begin_closing();
    shutdown.cancel();
    prompt_rx.close();
    while let Ok(task) = prompt_rx.try_recv() {
        depth.abandoned();
        let err = QueueError::not_accepting("queue owner is closing");
        let _ = task.replies.send(QueueResponse::error_for(task.request_id.clone(), &err)).await;
    }
    runtime.close().await;
    info!(session_id = %config.session_id, "queue owner stopped");
    Ok(0)
}

/// Pop prompt tasks until the idle TTL expires, the channel closes, or
/// shutdown fires. Public so integration tests can drive the loop with a
/// scripted runner.
pub async fn run_queue_loop(
    turn: Rc<TurnController>,
    runner: Rc<dyn PromptRunner>,
    prompt_rx: &mut mpsc::Receiver<PromptTask>,
    depth: QueueDepth,
    ttl: Option<Duration>,
    shutdown: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = recv_with_ttl(prompt_rx, ttl) => match received {
                TaskWait::Task(task) => task,
                TaskWait::TtlExpired => {
                    info!("idle ttl expired, shutting down");
                    break;
                }
                TaskWait::Closed => break,
            },
        };
        depth.started();
        tokio::select! {
            _ = shutdown.cancelled() => {
                // The in-flight task's socket closes with the process; the
                // client observes a disconnect before completion.
                depth.finished();
                break;
            }
            _ = run_prompt_turn(&task, &turn, runner.as_ref()) => {
                depth.finished();
            }
        }
    }
}

enum TaskWait {
    Task(PromptTask),
    TtlExpired,
    Closed,
}

async fn recv_with_ttl(rx: &mut mpsc::Receiver<PromptTask>, ttl: Option<Duration>) -> TaskWait {
    match ttl {
        Some(ttl) => match tokio::time::timeout(ttl, rx.recv()).await {
            Ok(Some(task)) => TaskWait::Task(task),
            Ok(None) => TaskWait::Closed,
            Err(_) => TaskWait::TtlExpired,
        },
        None => match rx.recv().await {
            Some(task) => TaskWait::Task(task),
            None => TaskWait::Closed,
        },
    }
}

/// One prompt turn: `begin_turn`, run the task through the runner, emit the
/// terminal pair (or error), `end_turn`.
pub async fn run_prompt_turn(
    task: &PromptTask,
    turn: &Rc<TurnController>,
    runner: &dyn PromptRunner,
) {
    if !turn.begin_turn() {
        let err = QueueError::not_accepting("queue owner is closing");
        let _ = task.replies.send(QueueResponse::error_for(task.request_id.clone(), &err)).await;
        return;
    }
    let outcome = runner.run_prompt(task, turn).await;
    turn.end_turn();
    match outcome {
        Ok(result) => {
            let _ = task
                .replies
                .send(QueueResponse::Done {
                    request_id: task.request_id.clone(),
                    stop_reason: result.stop_reason.clone(),
                })
                .await;
            let _ = task
                .replies
                .send(QueueResponse::Result { request_id: task.request_id.clone(), result })
                .await;
        }
        Err(e) => {
            warn!(request_id = %task.request_id, "prompt turn failed: {e}");
            let _ =
                task.replies.send(QueueResponse::error_for(task.request_id.clone(), &e)).await;
        }
    }
}

/// Rewrite the lease on the heartbeat interval until shutdown. The task
/// dies with the local set, so it cannot keep the process alive.
pub fn spawn_heartbeat(
    paths: QueuePaths,
    mut lease: Lease,
    depth: QueueDepth,
    shutdown: CancellationToken,
) {
    tokio::task::spawn_local(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = lease::refresh(&paths, &mut lease, depth.current()) {
                        warn!("lease refresh failed: {e}");
                    }
                }
            }
        }
    });
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::task::spawn_local(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();
    });
}

// ---------------------------------------------------------------------------
// Agent-backed runner
// ---------------------------------------------------------------------------

/// Production [`PromptRunner`]: owns the adapter connection, creates it
/// lazily on the first task, and reuses the default session across turns.
pub struct AgentRuntime {
    agent_config: AgentConfig,
    paths: QueuePaths,
    record: RefCell<SessionRecord>,
    permissions: Rc<PermissionPolicy>,
    initial_mode: Option<String>,
    mode_applied: Cell<bool>,
    client: RefCell<Option<Rc<AgentClient>>>,
    default_session: RefCell<Option<acp::SessionId>>,
}

impl AgentRuntime {
    pub fn new(
        config: &OwnerConfig,
        record: SessionRecord,
        permissions: Rc<PermissionPolicy>,
        paths: QueuePaths,
    ) -> Self {
        let agent_config = AgentConfig {
            command: record.agent_command.clone(),
            cwd: record.cwd.clone(),
            suppress_sdk_console_errors: config.suppress_sdk_console_errors,
        };
        Self {
            agent_config,
            paths,
            record: RefCell::new(record),
            permissions,
            initial_mode: config.permission_mode.clone(),
            mode_applied: Cell::new(false),
            client: RefCell::new(None),
            default_session: RefCell::new(None),
        }
    }

    async fn ensure_client(&self) -> Result<Rc<AgentClient>, QueueError> {
        let existing = self.client.borrow().clone();
        if let Some(client) = existing {
            return Ok(client);
        }
        let client = AgentClient::start(&self.agent_config, self.permissions.clone()).await?;
        *self.client.borrow_mut() = Some(client.clone());
        Ok(client)
    }

    /// The most recent default session, created on demand. The adapter-side
    /// session id is persisted to the session record as soon as it is known.
    async fn ensure_session(&self) -> Result<(Rc<AgentClient>, acp::SessionId), QueueError> {
        let client = self.ensure_client().await?;
        let existing = self.default_session.borrow().clone();
        if let Some(session_id) = existing {
            return Ok((client, session_id));
        }
        let record = self.record.borrow().clone();
        let session_id = client.load_or_create(&record).await?;
        *self.default_session.borrow_mut() = Some(session_id.clone());
        self.touch_record(Some(&session_id.to_string()));
        if let Some(ref mode) = self.initial_mode {
            if !self.mode_applied.get() {
                self.mode_applied.set(true);
                if let Err(e) = client.set_mode(&session_id, mode).await {
                    warn!(%mode, "failed to apply initial session mode: {e}");
                }
            }
        }
        Ok((client, session_id))
    }

    fn touch_record(&self, acp_session_id: Option<&str>) {
        let mut record = self.record.borrow_mut();
        if let Err(e) = record::touch(&self.paths, &mut record, acp_session_id) {
            warn!("failed to update session record: {e}");
        }
    }

    pub async fn close(&self) {
        let client = self.client.borrow_mut().take();
        if let Some(client) = client {
            client.close().await;
        }
    }
}

#[async_trait(?Send)]
impl PromptRunner for AgentRuntime {
    async fn run_prompt(
        &self,
        task: &PromptTask,
        turn: &Rc<TurnController>,
    ) -> Result<PromptResultBody, QueueError> {
        let started = Instant::now();
        self.permissions.reset();
        if let Some(answer) = task.submission.non_interactive_permissions {
            self.permissions.set_answer(answer);
        }

        let (client, session_id) = self.ensure_session().await?;
        let mut events = client.subscribe();

        let controller: Rc<dyn PromptController> =
            Rc::new(ActivePrompt { client: client.clone(), session_id: session_id.clone() });
        turn.set_active_controller(controller).await;

        let mut prompt_fut = Box::pin(client.prompt(&session_id, &task.submission.message));
        turn.mark_prompt_active().await;

        let deadline = task
            .submission
            .timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let mut update_count = 0u64;

        let outcome = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        forward_agent_event(event, &session_id, task, &mut update_count).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "dropped session updates");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        break Err(QueueError::prompt_failed(
                            ErrorOrigin::Runtime,
                            "adapter connection closed mid-turn",
                            None,
                        ));
                    }
                },
                result = &mut prompt_fut => break result,
                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                }, if deadline.is_some() => {
                    let _ = client.cancel(&session_id).await;
                    break Err(QueueError::Timeout(
                        Duration::from_millis(task.submission.timeout_ms.unwrap_or_default()),
                    ));
                }
            }
        };

        // Drain updates that raced the prompt completion so every streamed
        // message precedes the terminal pair.
        if outcome.is_ok() {
            while let Ok(event) = events.try_recv() {
                forward_agent_event(event, &session_id, task, &mut update_count).await;
            }
        }

        turn.clear_active_controller();
        self.touch_record(None);

        outcome.map(|stop_reason| PromptResultBody {
            stop_reason: crate::agent::stop_reason_str(&stop_reason),
            duration_ms: started.elapsed().as_millis() as u64,
            update_count,
            permission_denied: self.permissions.denied(),
        })
    }
}

#[async_trait(?Send)]
impl ControlFallback for AgentRuntime {
    async fn set_mode(&self, mode_id: &str) -> Result<(), QueueError> {
        let (client, session_id) = self.ensure_session().await?;
        client.set_mode(&session_id, mode_id).await
    }

    async fn set_config_option(&self, config_id: &str, value: Value) -> Result<Value, QueueError> {
        let (client, session_id) = self.ensure_session().await?;
        client.set_config_option(&session_id, config_id, value).await
    }
}

/// Forward one adapter event onto the task's connection, filtering out
/// notifications for other sessions.
async fn forward_agent_event(
    event: AgentEvent,
    session_id: &acp::SessionId,
    task: &PromptTask,
    update_count: &mut u64,
) {
    match event {
        AgentEvent::Update(notification) => {
            if notification.session_id != *session_id {
                return;
            }
            *update_count += 1;
            match serde_json::to_value(&notification) {
                Ok(value) => {
                    let _ = task
                        .replies
                        .send(QueueResponse::SessionUpdate {
                            request_id: task.request_id.clone(),
                            notification: value,
                        })
                        .await;
                }
                Err(e) => debug!("unserializable session update: {e}"),
            }
        }
        AgentEvent::ClientOp(operation) => match serde_json::to_value(&operation) {
            Ok(value) => {
                let _ = task
                    .replies
                    .send(QueueResponse::ClientOperation {
                        request_id: task.request_id.clone(),
                        operation: value,
                    })
                    .await;
            }
            Err(e) => debug!("unserializable client operation: {e}"),
        },
    }
}

/// Active-controller handle for the in-flight prompt: adapter-scoped cancel
/// and session controls.
struct ActivePrompt {
    client: Rc<AgentClient>,
    session_id: acp::SessionId,
}

#[async_trait(?Send)]
impl PromptController for ActivePrompt {
    async fn cancel(&self) -> Result<(), QueueError> {
        self.client.cancel(&self.session_id).await
    }

    async fn set_mode(&self, mode_id: &str) -> Result<(), QueueError> {
        self.client.set_mode(&self.session_id, mode_id).await
    }

    async fn set_config_option(&self, config_id: &str, value: Value) -> Result<Value, QueueError> {
        self.client.set_config_option(&self.session_id, config_id, value).await
    }
}

#[cfg(test)]
#[path = "owner_tests.rs"]
mod tests;
