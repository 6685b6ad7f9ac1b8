// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent session records under `~/.acpx/sessions/`.
//!
//! A record remembers how a session was created (agent command, working
//! directory) plus the adapter-side session id, so the queue owner can
//! reload the same conversation. Writers use temp-file + rename so a reader
//! sees the previous snapshot or the next, never a torn file.

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::paths::{QueuePaths, SessionKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Record id: the SessionKey digest.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub agent_command: Vec<String>,
    pub cwd: PathBuf,
    /// Adapter-side session id, set after the first successful turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acp_session_id: Option<String>,
    pub created_at: u64,
    pub last_used_at: u64,
}

impl SessionRecord {
    pub fn from_key(key: &SessionKey) -> Self {
        let now = now_epoch_ms();
        Self {
            id: key.digest(),
            name: key.name.clone(),
            agent_command: key.agent_command.clone(),
            cwd: key.cwd.clone(),
            acp_session_id: None,
            created_at: now,
            last_used_at: now,
        }
    }
}

/// Load a record, returning `None` when absent or unreadable.
pub fn load(paths: &QueuePaths, session_id: &str) -> std::io::Result<Option<SessionRecord>> {
    let path = paths.record_path(session_id);
    let data = match std::fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    match serde_json::from_str(&data) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            warn!(path = %path.display(), "unreadable session record: {e}");
            Ok(None)
        }
    }
}

/// Persist a record atomically (temp file in the same directory + rename).
pub fn store(paths: &QueuePaths, record: &SessionRecord) -> std::io::Result<()> {
    paths.ensure_dirs()?;
    let path = paths.record_path(&record.id);
    let dir = paths.sessions_dir();
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    serde_json::to_writer(&mut tmp, record).map_err(std::io::Error::other)?;
    tmp.write_all(b"\n")?;
    tmp.persist(&path).map_err(|e| e.error)?;
    Ok(())
}

/// Load the record for a key, creating and persisting it on first use.
pub fn ensure(paths: &QueuePaths, key: &SessionKey) -> std::io::Result<SessionRecord> {
    let id = key.digest();
    if let Some(record) = load(paths, &id)? {
        return Ok(record);
    }
    let record = SessionRecord::from_key(key);
    store(paths, &record)?;
    Ok(record)
}

/// Stamp `lastUsedAt` (and optionally the adapter session id) after a turn.
pub fn touch(
    paths: &QueuePaths,
    record: &mut SessionRecord,
    acp_session_id: Option<&str>,
) -> std::io::Result<()> {
    record.last_used_at = now_epoch_ms();
    if let Some(id) = acp_session_id {
        record.acp_session_id = Some(id.to_owned());
    }
    store(paths, record)
}

/// Return the current UTC time as milliseconds since the Unix epoch.
pub fn now_epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
