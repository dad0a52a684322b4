//! Error types for devicelink.
//!
//! Every failure carries a stable [`ErrorCode`] so that two different causes
//! never collapse into the same user-facing message.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Primary error type for all auth operations.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No OAuth client id configured (set DEVICELINK_GITHUB_CLIENT_ID or `config set oauth.client_id`)")]
    NoClientId,

    #[error("OAuth client id from {source_name} has an invalid format: {value:?}")]
    InvalidClientIdFormat { source_name: String, value: String },

    #[error("Config key rejected: {key:?} ({reason})")]
    ConfigKeyRejected { key: String, reason: String },

    #[error("Config file {path} is invalid: {message}")]
    ConfigInvalid { path: String, message: String },

    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    #[error("OAuth application rejected (status {status}): {body}")]
    ClientIdUnauthorized { status: u16, body: String },

    #[error("Rate limited (status {status}, retry after {retry_after_secs:?}s): {body}")]
    RateLimited {
        status: u16,
        retry_after_secs: Option<u64>,
        body: String,
    },

    #[error("Malformed provider response (status {status}): {message}")]
    MalformedResponse { status: u16, message: String },

    #[error("Provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Token endpoint rejected the request: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    TokenEndpointRejected {
        error: String,
        description: Option<String>,
    },

    #[error("Failed to spawn polling worker {program}: {message}")]
    SpawnFailed { program: String, message: String },

    #[error("Invalid worker arguments: {0}")]
    InvalidWorkerArgs(String),

    #[error("Credential storage failed: {0}")]
    StorageFailed(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Stable, machine-readable error identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoClientId,
    InvalidClientIdFormat,
    ConfigKeyRejected,
    ConfigInvalid,
    NetworkUnreachable,
    NetworkTimeout,
    ClientIdUnauthorized,
    RateLimited,
    MalformedResponse,
    Http(u16),
    TokenEndpointRejected,
    SpawnFailed,
    InvalidWorkerArgs,
    StorageFailed,
    IoError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoClientId => "NO_CLIENT_ID",
            Self::InvalidClientIdFormat => "INVALID_CLIENT_ID_FORMAT",
            Self::ConfigKeyRejected => "CONFIG_KEY_REJECTED",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::NetworkUnreachable => "NETWORK_UNREACHABLE",
            Self::NetworkTimeout => "NETWORK_TIMEOUT",
            Self::ClientIdUnauthorized => "CLIENT_ID_UNAUTHORIZED",
            Self::RateLimited => "RATE_LIMITED",
            Self::MalformedResponse => "MALFORMED_RESPONSE",
            Self::Http(status) => return write!(f, "HTTP_{status}"),
            Self::TokenEndpointRejected => "TOKEN_ENDPOINT_REJECTED",
            Self::SpawnFailed => "SPAWN_FAILED",
            Self::InvalidWorkerArgs => "INVALID_WORKER_ARGS",
            Self::StorageFailed => "STORAGE_FAILED",
            Self::IoError => "IO_ERROR",
        };
        f.write_str(name)
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl std::str::FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let code = match s {
            "NO_CLIENT_ID" => Self::NoClientId,
            "INVALID_CLIENT_ID_FORMAT" => Self::InvalidClientIdFormat,
            "CONFIG_KEY_REJECTED" => Self::ConfigKeyRejected,
            "CONFIG_INVALID" => Self::ConfigInvalid,
            "NETWORK_UNREACHABLE" => Self::NetworkUnreachable,
            "NETWORK_TIMEOUT" => Self::NetworkTimeout,
            "CLIENT_ID_UNAUTHORIZED" => Self::ClientIdUnauthorized,
            "RATE_LIMITED" => Self::RateLimited,
            "MALFORMED_RESPONSE" => Self::MalformedResponse,
            "TOKEN_ENDPOINT_REJECTED" => Self::TokenEndpointRejected,
            "SPAWN_FAILED" => Self::SpawnFailed,
            "INVALID_WORKER_ARGS" => Self::InvalidWorkerArgs,
            "STORAGE_FAILED" => Self::StorageFailed,
            "IO_ERROR" => Self::IoError,
            other => {
                let status = other
                    .strip_prefix("HTTP_")
                    .and_then(|s| s.parse::<u16>().ok())
                    .ok_or_else(|| format!("unknown error code {other:?}"))?;
                Self::Http(status)
            }
        };
        Ok(code)
    }
}

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Provider,
    Process,
    Storage,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    Reconfigure,
    RetryWithBackoff,
    CheckOAuthApplication,
    RestartLogin,
    CheckInstallation,
    CheckDiskPermissions,
}

impl AuthError {
    /// Stable identifier for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NoClientId => ErrorCode::NoClientId,
            Self::InvalidClientIdFormat { .. } => ErrorCode::InvalidClientIdFormat,
            Self::ConfigKeyRejected { .. } => ErrorCode::ConfigKeyRejected,
            Self::ConfigInvalid { .. } => ErrorCode::ConfigInvalid,
            Self::NetworkUnreachable(_) => ErrorCode::NetworkUnreachable,
            Self::NetworkTimeout(_) => ErrorCode::NetworkTimeout,
            Self::ClientIdUnauthorized { .. } => ErrorCode::ClientIdUnauthorized,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::MalformedResponse { .. } => ErrorCode::MalformedResponse,
            Self::Http { status, .. } => ErrorCode::Http(*status),
            Self::TokenEndpointRejected { .. } => ErrorCode::TokenEndpointRejected,
            Self::SpawnFailed { .. } => ErrorCode::SpawnFailed,
            Self::InvalidWorkerArgs(_) => ErrorCode::InvalidWorkerArgs,
            Self::StorageFailed(_) => ErrorCode::StorageFailed,
            Self::Io(_) => ErrorCode::IoError,
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoClientId
            | Self::InvalidClientIdFormat { .. }
            | Self::ConfigKeyRejected { .. }
            | Self::ConfigInvalid { .. } => ErrorCategory::Configuration,
            Self::NetworkUnreachable(_) | Self::NetworkTimeout(_) => ErrorCategory::Network,
            Self::ClientIdUnauthorized { .. }
            | Self::RateLimited { .. }
            | Self::MalformedResponse { .. }
            | Self::Http { .. }
            | Self::TokenEndpointRejected { .. } => ErrorCategory::Provider,
            Self::SpawnFailed { .. } | Self::InvalidWorkerArgs(_) => ErrorCategory::Process,
            Self::StorageFailed(_) | Self::Io(_) => ErrorCategory::Storage,
        }
    }

    /// Whether a background poller may retry after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkUnreachable(_) | Self::NetworkTimeout(_) | Self::RateLimited { .. } => {
                true
            }
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            Self::ClientIdUnauthorized { .. } => RecoverySuggestion::CheckOAuthApplication,
            Self::TokenEndpointRejected { .. } | Self::MalformedResponse { .. } => {
                RecoverySuggestion::RestartLogin
            }
            _ => match self.category() {
                ErrorCategory::Configuration => RecoverySuggestion::Reconfigure,
                ErrorCategory::Network | ErrorCategory::Provider => {
                    RecoverySuggestion::RetryWithBackoff
                }
                ErrorCategory::Process => RecoverySuggestion::CheckInstallation,
                ErrorCategory::Storage => RecoverySuggestion::CheckDiskPermissions,
            },
        }
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Io(format!("serialization: {error}"))
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AuthError>;
