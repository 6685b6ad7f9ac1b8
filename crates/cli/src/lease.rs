// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue-owner leases: one lock file per session under `~/.acpx/queues/`.
//!
//! The lock file is created with exclusive-create semantics, so for any
//! session at most one process ever holds a live lease. A lease whose pid is
//! dead may be reclaimed by unlinking and retrying once. The owner rewrites
//! the file every heartbeat via temp-file + rename, which keeps reads
//! linearizable: a reader sees the previous snapshot or the next.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::paths::QueuePaths;
use crate::record::now_epoch_ms;

/// How often the owner rewrites its lease.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// A lease whose `refreshedAt` is older than this is suspect; readers
/// re-probe the pid before trusting it.
pub const STALE_GRACE: Duration = Duration::from_secs(15);

/// On-disk lease record, one line of JSON in the lock file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub pid: u32,
    pub session_id: String,
    pub socket_path: PathBuf,
    pub acquired_at: u64,
    pub refreshed_at: u64,
    pub queue_depth: u32,
}

impl Lease {
    fn new(session_id: &str, socket_path: PathBuf) -> Self {
        let now = now_epoch_ms();
        Self {
            pid: std::process::id(),
            session_id: session_id.to_owned(),
            socket_path,
            acquired_at: now,
            refreshed_at: now,
            queue_depth: 0,
        }
    }

    /// True when the heartbeat has not advanced within the grace window.
    pub fn is_stale(&self) -> bool {
        now_epoch_ms().saturating_sub(self.refreshed_at) > STALE_GRACE.as_millis() as u64
    }
}

/// Attempt to become the queue owner for a session.
///
/// Returns `None` when another live process already owns the session. A lock
/// file naming a dead pid is reclaimed by unlinking and retrying exactly
/// once; losing that race also yields `None`.
pub fn try_acquire(paths: &QueuePaths, session_id: &str) -> std::io::Result<Option<Lease>> {
    paths.ensure_dirs()?;
    let lease = Lease::new(session_id, paths.socket_path(session_id));
    match create_exclusive(paths, &lease) {
        Ok(()) => return Ok(Some(lease)),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e),
    }

    if let Some(existing) = read(paths, session_id)? {
        if pid_alive(existing.pid) {
            return Ok(None);
        }
        debug!(session_id, pid = existing.pid, "reclaiming lease from dead owner");
    }
    // Dead or unreadable owner: unlink and retry once.
    let _ = std::fs::remove_file(paths.lock_path(session_id));
    match create_exclusive(paths, &lease) {
        Ok(()) => Ok(Some(lease)),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e),
    }
}

fn create_exclusive(paths: &QueuePaths, lease: &Lease) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(paths.lock_path(&lease.session_id))?;
    let line = serde_json::to_string(lease).map_err(std::io::Error::other)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()
}

/// Read the lease for a session. Absent and unparseable files both read as
/// `None`: a torn or corrupt lock file is reclaimable, not fatal.
pub fn read(paths: &QueuePaths, session_id: &str) -> std::io::Result<Option<Lease>> {
    let path = paths.lock_path(session_id);
    let data = match std::fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    match serde_json::from_str(data.trim()) {
        Ok(lease) => Ok(Some(lease)),
        Err(e) => {
            warn!(path = %path.display(), "unreadable lease: {e}");
            Ok(None)
        }
    }
}

/// Heartbeat: rewrite the lock file with a fresh `refreshedAt` and the
/// current queue depth. Atomic (temp + rename in the same directory).
pub fn refresh(paths: &QueuePaths, lease: &mut Lease, queue_depth: u32) -> std::io::Result<()> {
    lease.refreshed_at = now_epoch_ms();
    lease.queue_depth = queue_depth;
    let dir = paths.queues_dir();
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    let line = serde_json::to_string(lease).map_err(std::io::Error::other)?;
    tmp.write_all(line.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.persist(paths.lock_path(&lease.session_id)).map_err(|e| e.error)?;
    Ok(())
}

/// Release the lease: unlink the lock file and, best effort, the socket.
pub fn release(paths: &QueuePaths, lease: &Lease) {
    if let Err(e) = std::fs::remove_file(paths.lock_path(&lease.session_id)) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(session_id = %lease.session_id, "failed to remove lock file: {e}");
        }
    }
    let _ = std::fs::remove_file(&lease.socket_path);
}

/// Guard an IPC attempt: the lock file must still exist, name the same pid,
/// and that pid must be alive.
pub fn ensure_usable(paths: &QueuePaths, lease: &Lease) -> std::io::Result<bool> {
    let Some(current) = read(paths, &lease.session_id)? else {
        return Ok(false);
    };
    Ok(current.pid == lease.pid && pid_alive(current.pid))
}

/// Probe a pid with signal 0. EPERM means the process exists but belongs to
/// someone else; it still counts as alive.
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Ask the owner of a session to shut down (SIGTERM). Returns whether a
/// signal was delivered.
pub fn terminate_owner_for(paths: &QueuePaths, session_id: &str) -> std::io::Result<bool> {
    let Some(lease) = read(paths, session_id)? else {
        return Ok(false);
    };
    if !pid_alive(lease.pid) {
        return Ok(false);
    }
    Ok(kill(Pid::from_raw(lease.pid as i32), Signal::SIGTERM).is_ok())
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
