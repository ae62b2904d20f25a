//! ltp_store — durable client-id → (thread-id, session-id) map
//!
//! Threads outlive connections: the ids handed out by the server on the
//! first successful handshake are persisted here so later connections can
//! resume the same thread. Nothing secret is stored — session keys are
//! ephemeral and never written to disk.
//!
//! The backing file is pretty-printed JSON of
//! `{ client_id: { thread_id, session_id } }`, by default
//! `~/.ltp_client.json`. Corrupt or unreadable content is treated as an
//! empty store and never surfaced to the caller.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const DEFAULT_FILE_NAME: &str = ".ltp_client.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Identity store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Identity store serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The ids a client holds for one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadIdentity {
    pub thread_id: String,
    pub session_id: String,
}

/// File-backed identity map, loaded lazily on first read.
pub struct IdentityStore {
    path: PathBuf,
    entries: Option<HashMap<String, ThreadIdentity>>,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: None,
        }
    }

    /// Store at the default location, `~/.ltp_client.json`. Falls back to a
    /// relative path when no home directory can be determined.
    pub fn open_default() -> Self {
        let path = directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(DEFAULT_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FILE_NAME));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up the stored ids for `client_id`.
    pub fn get_ids(&mut self, client_id: &str) -> Option<ThreadIdentity> {
        self.entries_mut().get(client_id).cloned()
    }

    /// Record the ids for `client_id` and persist.
    pub fn set_ids(
        &mut self,
        client_id: &str,
        thread_id: &str,
        session_id: &str,
    ) -> Result<(), StoreError> {
        let path = self.path.clone();
        let entries = self.entries_mut();
        entries.insert(
            client_id.to_string(),
            ThreadIdentity {
                thread_id: thread_id.to_string(),
                session_id: session_id.to_string(),
            },
        );
        Self::persist(&path, entries)
    }

    /// Forget the ids for `client_id` and persist.
    pub fn clear(&mut self, client_id: &str) -> Result<(), StoreError> {
        let path = self.path.clone();
        let entries = self.entries_mut();
        if entries.remove(client_id).is_some() {
            Self::persist(&path, entries)?;
        }
        Ok(())
    }

    fn entries_mut(&mut self) -> &mut HashMap<String, ThreadIdentity> {
        let path = &self.path;
        self.entries.get_or_insert_with(|| Self::load(path))
    }

    fn load(path: &Path) -> HashMap<String, ThreadIdentity> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "identity store not readable, starting empty");
                return HashMap::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "identity store corrupt, starting empty");
                HashMap::new()
            }
        }
    }

    /// Write via a temp file + rename so a crash mid-write never leaves a
    /// truncated store behind.
    fn persist(path: &Path, entries: &HashMap<String, ThreadIdentity>) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
