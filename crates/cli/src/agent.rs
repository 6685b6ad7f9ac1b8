// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin facade over the ACP connector.
//!
//! Spawns the agent adapter, negotiates `initialize`, and exposes only what
//! the owner runtime needs: session load/create, prompt, cancel, set-mode,
//! set-config-option, close. The connector's futures are `!Send`, so
//! everything here runs on the owner's `LocalSet`.

use std::cell::RefCell;
use std::path::PathBuf;
use std::process::Stdio;
use std::rc::Rc;

use agent_client_protocol::{self as acp, Agent as _};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::broadcast;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tracing::{debug, error, warn};

use crate::error::{ErrorOrigin, QueueError};
use crate::permissions::PermissionPolicy;
use crate::record::SessionRecord;

/// Client-side side effect performed on behalf of the agent; reported to the
/// foreground as `client_operation` messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientOperation {
    #[serde(rename_all = "camelCase")]
    FsReadTextFile { path: PathBuf },
    #[serde(rename_all = "camelCase")]
    FsWriteTextFile { path: PathBuf, bytes: usize },
}

/// Event fanned out from the adapter connection to whoever streams the
/// current turn.
#[derive(Clone)]
pub enum AgentEvent {
    Update(acp::SessionNotification),
    ClientOp(ClientOperation),
}

/// How to start the adapter subprocess.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub command: Vec<String>,
    pub cwd: PathBuf,
    /// Drop adapter stderr instead of forwarding it to the log.
    pub suppress_sdk_console_errors: bool,
}

/// `acp::Client` half of the connection: permission requests, streamed
/// session updates, and the advertised fs operations.
struct AcpxClient {
    events: broadcast::Sender<AgentEvent>,
    permissions: Rc<PermissionPolicy>,
    cwd: PathBuf,
}

#[async_trait(?Send)]
impl acp::Client for AcpxClient {
    async fn request_permission(
        &self,
        args: acp::RequestPermissionRequest,
    ) -> acp::Result<acp::RequestPermissionResponse> {
        let outcome = self.permissions.decide(&args);
        Ok(acp::RequestPermissionResponse::new(outcome))
    }

    async fn session_notification(&self, args: acp::SessionNotification) -> acp::Result<()> {
        let _ = self.events.send(AgentEvent::Update(args));
        Ok(())
    }

    async fn read_text_file(
        &self,
        args: acp::ReadTextFileRequest,
    ) -> acp::Result<acp::ReadTextFileResponse> {
        let path = self.cwd.join(&args.path);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let _ = self.events.send(AgentEvent::ClientOp(ClientOperation::FsReadTextFile {
                    path: args.path.clone(),
                }));
                Ok(acp::ReadTextFileResponse::new(content))
            }
            Err(e) => {
                Err(acp::Error::internal_error().data(Value::String(e.to_string())))
            }
        }
    }

    async fn write_text_file(
        &self,
        args: acp::WriteTextFileRequest,
    ) -> acp::Result<acp::WriteTextFileResponse> {
        let path = self.cwd.join(&args.path);
        match tokio::fs::write(&path, args.content.as_bytes()).await {
            Ok(()) => {
                let _ = self.events.send(AgentEvent::ClientOp(ClientOperation::FsWriteTextFile {
                    path: args.path.clone(),
                    bytes: args.content.len(),
                }));
                Ok(acp::WriteTextFileResponse::new())
            }
            Err(e) => {
                Err(acp::Error::internal_error().data(Value::String(e.to_string())))
            }
        }
    }
}

/// Long-lived connection to one agent adapter, owned by the queue owner.
pub struct AgentClient {
    conn: Rc<acp::ClientSideConnection>,
    child: RefCell<Option<Child>>,
    events: broadcast::Sender<AgentEvent>,
    load_session_supported: bool,
}

impl AgentClient {
    /// Spawn the adapter and run the `initialize` handshake, advertising
    /// client-side `fs/read_text_file` and `fs/write_text_file`.
    pub async fn start(
        config: &AgentConfig,
        permissions: Rc<PermissionPolicy>,
    ) -> Result<Rc<Self>, QueueError> {
        let Some((program, args)) = config.command.split_first() else {
            return Err(QueueError::prompt_failed(
                ErrorOrigin::Runtime,
                "no agent command configured",
                None,
            ));
        };
        let mut child = Command::new(program)
            .args(args)
            .current_dir(&config.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                QueueError::prompt_failed(
                    ErrorOrigin::Runtime,
                    format!("failed to spawn agent adapter {program:?}: {e}"),
                    None,
                )
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            QueueError::prompt_failed(ErrorOrigin::Runtime, "failed to open adapter stdin", None)
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            QueueError::prompt_failed(ErrorOrigin::Runtime, "failed to open adapter stdout", None)
        })?;
        if let Some(stderr) = child.stderr.take() {
            let suppress = config.suppress_sdk_console_errors;
            tokio::task::spawn_local(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !suppress && !line.trim().is_empty() {
                        debug!(target: "acpx::agent", "{line}");
                    }
                }
            });
        }

        let (events, _) = broadcast::channel(512);
        let client = AcpxClient {
            events: events.clone(),
            permissions,
            cwd: config.cwd.clone(),
        };
        let (conn, io_task) =
            acp::ClientSideConnection::new(client, stdin.compat_write(), stdout.compat(), |fut| {
                tokio::task::spawn_local(fut);
            });
        tokio::task::spawn_local(async move {
            if let Err(err) = io_task.await {
                error!(?err, "agent io loop terminated");
            }
        });
        let conn = Rc::new(conn);

        let init = conn
            .initialize(
                acp::InitializeRequest::new(acp::ProtocolVersion::LATEST)
                    .client_capabilities(
                        acp::ClientCapabilities::new()
                            .fs(acp::FileSystemCapability::new()
                                .read_text_file(true)
                                .write_text_file(true))
                            .terminal(false),
                    )
                    .client_info(acp::Implementation::new("acpx", env!("CARGO_PKG_VERSION"))),
            )
            .await
            .map_err(|e| agent_error("initialize failed", &e))?;
        if let Some(ref info) = init.agent_info {
            debug!(agent = %info.name, version = %info.version, "adapter initialized");
        }

        Ok(Rc::new(Self {
            conn,
            child: RefCell::new(Some(child)),
            events,
            load_session_supported: init.agent_capabilities.load_session,
        }))
    }

    /// Subscribe to session updates and client operations.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// Load the recorded adapter session when the agent supports it, else
    /// create a fresh one.
    pub async fn load_or_create(
        &self,
        record: &SessionRecord,
    ) -> Result<acp::SessionId, QueueError> {
        if let Some(ref existing) = record.acp_session_id {
            if self.load_session_supported {
                let request = acp::LoadSessionRequest::new(
                    acp::SessionId::new(existing.as_str()),
                    record.cwd.clone(),
                );
                match self.conn.load_session(request).await {
                    Ok(_) => return Ok(acp::SessionId::new(existing.as_str())),
                    Err(e) => {
                        warn!(session = %existing, "session load failed, creating a new one: {}", e.message);
                    }
                }
            }
        }
        let response = self
            .conn
            .new_session(acp::NewSessionRequest::new(record.cwd.clone()))
            .await
            .map_err(|e| agent_error("session create failed", &e))?;
        Ok(response.session_id)
    }

    /// One prompt turn. Resolves with the adapter's stop reason.
    pub async fn prompt(
        &self,
        session_id: &acp::SessionId,
        message: &str,
    ) -> Result<acp::StopReason, QueueError> {
        let request = acp::PromptRequest::new(
            session_id.clone(),
            vec![acp::ContentBlock::Text(acp::TextContent::new(message.to_string()))],
        );
        let response = self
            .conn
            .prompt(request)
            .await
            .map_err(|e| agent_error("prompt failed", &e))?;
        Ok(response.stop_reason)
    }

    /// Cancel the in-flight prompt (`session/cancel` notification).
    pub async fn cancel(&self, session_id: &acp::SessionId) -> Result<(), QueueError> {
        self.conn
            .cancel(acp::CancelNotification::new(session_id.clone()))
            .await
            .map_err(|e| agent_control_error("cancel failed", &e))
    }

    pub async fn set_mode(
        &self,
        session_id: &acp::SessionId,
        mode_id: &str,
    ) -> Result<(), QueueError> {
        self.conn
            .set_session_mode(acp::SetSessionModeRequest::new(
                session_id.clone(),
                acp::SessionModeId::new(mode_id),
            ))
            .await
            .map_err(|e| agent_control_error("set-mode failed", &e))?;
        Ok(())
    }

    /// Session config options ride the protocol's extension mechanism; the
    /// raw agent response is returned verbatim.
    pub async fn set_config_option(
        &self,
        session_id: &acp::SessionId,
        config_id: &str,
        value: Value,
    ) -> Result<Value, QueueError> {
        let params = json!({
            "sessionId": session_id,
            "configId": config_id,
            "value": value,
        });
        let raw = serde_json::value::to_raw_value(&params).map_err(|e| {
            QueueError::control_failed(
                ErrorOrigin::Runtime,
                format!("unserializable config option: {e}"),
                None,
            )
        })?;
        let response = self
            .conn
            .ext_method(acp::ExtRequest::new("session/set_config_option", raw.into()))
            .await
            .map_err(|e| agent_control_error("set-config-option failed", &e))?;
        serde_json::to_value(&response).map_err(|e| {
            QueueError::control_failed(
                ErrorOrigin::Agent,
                format!("unserializable config option response: {e}"),
                None,
            )
        })
    }

    /// Tear down the adapter subprocess.
    pub async fn close(&self) {
        let child = self.child.borrow_mut().take();
        if let Some(mut child) = child {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

/// Wire string for a stop reason (`end_turn`, `cancelled`, ...), taken from
/// its protocol serialization.
pub fn stop_reason_str(reason: &acp::StopReason) -> String {
    serde_json::to_value(reason)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_else(|| "end_turn".to_owned())
}

fn agent_error(context: &str, err: &acp::Error) -> QueueError {
    QueueError::prompt_failed(
        ErrorOrigin::Agent,
        format!("{context}: {}", err.message),
        serde_json::to_value(err).ok(),
    )
}

fn agent_control_error(context: &str, err: &acp::Error) -> QueueError {
    QueueError::control_failed(
        ErrorOrigin::Agent,
        format!("{context}: {}", err.message),
        serde_json::to_value(err).ok(),
    )
}
