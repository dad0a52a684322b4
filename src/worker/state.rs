//! The worker state file: a single JSON object at a well-known path.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::config::AuthPaths;
use crate::error::{AuthError, ErrorCode};
use crate::util::fs::atomic_write;

/// Lifecycle of one polling worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Started,
    Polling,
    Success,
    Denied,
    Expired,
    Error,
    Fatal,
}

impl WorkerStatus {
    /// Terminal states end the worker process.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Denied | Self::Expired | Self::Fatal
        )
    }
}

/// Error recorded alongside an `ERROR` / `FATAL` status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&AuthError> for ErrorRecord {
    fn from(err: &AuthError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Snapshot written by the worker on every poll tick and heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerState {
    pub flow_id: Uuid,
    pub status: WorkerStatus,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_start_ticks: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub attempts: u32,
    pub expires_at: DateTime<Utc>,
    pub interval_secs: u64,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorRecord>,
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Seconds until `expires_at`, negative once past.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds()
    }
}

/// Reader/writer for the state file.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_paths(paths: &AuthPaths) -> Self {
        Self::new(paths.state_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no flow has ever run.
    pub fn read(&self) -> Result<Option<WorkerState>, AuthError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::Io(err.to_string())),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Replace the file atomically.
    pub fn write(&self, state: &WorkerState) -> Result<(), AuthError> {
        let serialized = serde_json::to_vec_pretty(state)?;
        atomic_write(&self.path, &serialized)?;
        Ok(())
    }
}
