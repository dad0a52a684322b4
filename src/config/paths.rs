//! Well-known file locations for one installation.

use std::path::{Path, PathBuf};

/// Environment variable overriding the base directory.
pub const HOME_ENV: &str = "DEVICELINK_HOME";

/// Locations of the config, state, log and credential files.
///
/// Every component receives an `AuthPaths` explicitly; nothing reads a
/// process-wide default behind the caller's back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPaths {
    base_dir: PathBuf,
}

impl AuthPaths {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// `$DEVICELINK_HOME`, else `~/.devicelink`.
    pub fn from_env() -> Self {
        match std::env::var_os(HOME_ENV) {
            Some(dir) if !dir.is_empty() => Self::new(dir),
            _ => Self::new(default_base_dir()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.toml")
    }

    pub fn state_file(&self) -> PathBuf {
        self.base_dir.join("worker-state.json")
    }

    pub fn log_file(&self) -> PathBuf {
        self.base_dir.join("worker.log")
    }

    pub fn credential_file(&self) -> PathBuf {
        self.base_dir.join("credentials.enc")
    }
}

fn default_base_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".devicelink"))
        .unwrap_or_else(|| PathBuf::from(".devicelink"))
}
