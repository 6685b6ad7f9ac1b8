// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session keys and the on-disk layout under `~/.acpx`.
//!
//! A session is named by the `(agent command, working directory, optional
//! name)` tuple. Its digest (the first 24 hex chars of a SHA-256 over the
//! tuple) is the basename of the lock file, the socket, and the session
//! record, so every invocation of the same tuple lands on the same owner.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the SHA-256 digest.
const DIGEST_HEX_LEN: usize = 24;

/// Stable identity of a persistent session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub agent_command: Vec<String>,
    pub cwd: PathBuf,
    pub name: Option<String>,
}

impl SessionKey {
    pub fn new(agent_command: Vec<String>, cwd: PathBuf, name: Option<String>) -> Self {
        Self { agent_command, cwd, name }
    }

    /// Deterministic short digest naming the lock/socket/record files.
    ///
    /// Fields are length-prefixed before hashing so that moving bytes between
    /// tuple elements cannot collide (`["ab"], "c"` vs `["a"], "bc"`).
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for part in &self.agent_command {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        let cwd = self.cwd.to_string_lossy();
        hasher.update((cwd.len() as u64).to_le_bytes());
        hasher.update(cwd.as_bytes());
        if let Some(ref name) = self.name {
            hasher.update((name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(DIGEST_HEX_LEN);
        for byte in digest.iter().take(DIGEST_HEX_LEN / 2) {
            hex.push_str(&format!("{byte:02x}"));
        }
        hex
    }
}

/// Resolved base directory and path helpers for queue state.
#[derive(Debug, Clone)]
pub struct QueuePaths {
    base: PathBuf,
}

impl QueuePaths {
    /// Resolve the base directory from the environment (`$HOME/.acpx`, or
    /// `%USERPROFILE%` where `HOME` is unset).
    pub fn from_env() -> anyhow::Result<Self> {
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .ok_or_else(|| anyhow::anyhow!("neither HOME nor USERPROFILE is set"))?;
        Ok(Self { base: PathBuf::from(home).join(".acpx") })
    }

    /// Use an explicit base directory (tests, embedding).
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn queues_dir(&self) -> PathBuf {
        self.base.join("queues")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.base.join("sessions")
    }

    pub fn lock_path(&self, session_id: &str) -> PathBuf {
        self.queues_dir().join(format!("{session_id}.lock"))
    }

    pub fn socket_path(&self, session_id: &str) -> PathBuf {
        self.queues_dir().join(format!("{session_id}.sock"))
    }

    pub fn record_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{session_id}.json"))
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.queues_dir())?;
        std::fs::create_dir_all(self.sessions_dir())
    }
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
