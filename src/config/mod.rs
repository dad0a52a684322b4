//! Configuration: file locations, provider endpoints and the settings store.
//!
//! The settings file has an explicit schema. Only allow-listed dotted keys
//! can be read or written, and key segments that name object internals
//! (`__proto__`, `constructor`, `prototype`) are rejected outright.

pub mod client_id;
pub mod paths;

pub use client_id::{ClientId, ClientIdResolver, ClientIdSource, CLIENT_ID_ENV, DEFAULT_CLIENT_ID};
pub use paths::AuthPaths;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::util::fs::atomic_write;

const DEFAULT_DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const DEFAULT_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";

/// Scopes requested when the caller does not specify any.
pub const DEFAULT_SCOPES: &[&str] = &["public_repo", "read:user"];

const FORBIDDEN_SEGMENTS: &[&str] = &["__proto__", "constructor", "prototype"];

/// OAuth provider endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub device_code_url: String,
    pub token_url: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            device_code_url: DEFAULT_DEVICE_CODE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }
}

impl ProviderEndpoints {
    /// Defaults, overridden by `DEVICELINK_DEVICE_CODE_URL` / `DEVICELINK_TOKEN_URL`.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut endpoints = Self::default();
        if let Ok(url) = std::env::var("DEVICELINK_DEVICE_CODE_URL") {
            endpoints.device_code_url = url;
        }
        if let Ok(url) = std::env::var("DEVICELINK_TOKEN_URL") {
            endpoints.token_url = url;
        }
        endpoints
    }

    /// Point both endpoints at `base` (`{base}/login/device/code`, `{base}/login/oauth/access_token`).
    pub fn with_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            device_code_url: format!("{base}/login/device/code"),
            token_url: format!("{base}/login/oauth/access_token"),
        }
    }
}

/// On-disk settings schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub oauth: OAuthSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OAuthSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// The allow-list of mutable settings paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    OAuthClientId,
}

impl ConfigKey {
    pub const ALL: &'static [ConfigKey] = &[ConfigKey::OAuthClientId];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OAuthClientId => "oauth.client_id",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = AuthError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let rejected = |reason: &str| AuthError::ConfigKeyRejected {
            key: raw.to_string(),
            reason: reason.to_string(),
        };

        let segments: Vec<&str> = raw.trim().split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(rejected("empty path segment"));
        }
        if segments
            .iter()
            .any(|s| FORBIDDEN_SEGMENTS.contains(&s.to_ascii_lowercase().as_str()))
        {
            return Err(rejected("reserved path segment"));
        }

        Self::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == raw.trim())
            .ok_or_else(|| rejected("not a settable key"))
    }
}

/// TOML-backed settings store.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_paths(paths: &AuthPaths) -> Self {
        Self::new(paths.config_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the settings file. A missing file yields defaults.
    pub fn load(&self) -> Result<Settings, AuthError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Settings::default())
            }
            Err(err) => return Err(AuthError::Io(err.to_string())),
        };
        toml::from_str(&raw).map_err(|err| AuthError::ConfigInvalid {
            path: self.path.display().to_string(),
            message: err.to_string(),
        })
    }

    fn save(&self, settings: &Settings) -> Result<(), AuthError> {
        let serialized = toml::to_string(settings).map_err(|err| AuthError::ConfigInvalid {
            path: self.path.display().to_string(),
            message: err.to_string(),
        })?;
        atomic_write(&self.path, serialized.as_bytes())?;
        Ok(())
    }

    pub fn get(&self, key: ConfigKey) -> Result<Option<String>, AuthError> {
        let settings = self.load()?;
        Ok(match key {
            ConfigKey::OAuthClientId => settings.oauth.client_id,
        })
    }

    /// Set `key` after validating `value` for that key.
    pub fn set(&self, key: ConfigKey, value: &str) -> Result<(), AuthError> {
        let mut settings = self.load()?;
        match key {
            ConfigKey::OAuthClientId => {
                let id = ClientId::parse(value, key.as_str())?;
                settings.oauth.client_id = Some(id.as_str().to_string());
            }
        }
        self.save(&settings)?;
        tracing::info!(key = %key, "Config value updated");
        Ok(())
    }

    pub fn unset(&self, key: ConfigKey) -> Result<(), AuthError> {
        let mut settings = self.load()?;
        match key {
            ConfigKey::OAuthClientId => settings.oauth.client_id = None,
        }
        self.save(&settings)
    }

    /// String-keyed access for untrusted input (CLI, tool arguments).
    pub fn get_path(&self, key: &str) -> Result<Option<String>, AuthError> {
        self.get(key.parse()?)
    }

    pub fn set_path(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.set(key.parse()?, value)
    }
}
