#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use devicelink::auth::vault::MIN_ITERATIONS;
use devicelink::auth::{CredentialStore, CredentialVault, PollOutcome, StoredToken, TokenPoller};
use devicelink::config::{AuthPaths, ClientId};
use devicelink::error::AuthError;
use devicelink::worker::WorkerJob;
use tempfile::TempDir;
use tokio::time::Instant;
use uuid::Uuid;

pub const CLIENT_ID: &str = "Iv1.0123456789abcdef";
pub const DEVICE_CODE: &str = "dc-secret-3f9a";

/// Isolated installation directory.
pub fn temp_paths() -> (TempDir, AuthPaths) {
    let dir = TempDir::new().expect("temp dir");
    let paths = AuthPaths::new(dir.path().join("home"));
    (dir, paths)
}

/// Vault with a fixed passphrase and the minimum KDF cost.
pub fn fast_vault(paths: &AuthPaths) -> CredentialVault {
    CredentialVault::new(paths)
        .with_passphrase("test-machine:test-user:/home/test")
        .with_iterations(MIN_ITERATIONS)
}

pub fn client_id() -> ClientId {
    ClientId::parse(CLIENT_ID, "test").expect("valid client id")
}

pub fn job(interval_secs: u64, expires_at: DateTime<Utc>) -> WorkerJob {
    WorkerJob {
        flow_id: Uuid::new_v4(),
        client_id: client_id(),
        device_code: DEVICE_CODE.to_string(),
        interval_secs,
        expires_at,
    }
}

pub fn job_expiring_in(interval_secs: u64, expires_in_secs: i64) -> WorkerJob {
    job(interval_secs, Utc::now() + Duration::seconds(expires_in_secs))
}

pub fn token(access_token: &str) -> StoredToken {
    StoredToken::new(access_token, "bearer", "public_repo read:user")
}

/// [`TokenPoller`] that replays a fixed script and records when it was
/// called. Once the script runs out it keeps answering `Pending`.
#[derive(Default)]
pub struct ScriptedPoller {
    script: Mutex<VecDeque<Result<PollOutcome, AuthError>>>,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedPoller {
    pub fn new(script: impl IntoIterator<Item = Result<PollOutcome, AuthError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    /// Time between consecutive polls.
    pub fn gaps(&self) -> Vec<std::time::Duration> {
        let calls = self.calls.lock().expect("calls lock");
        calls.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait]
impl TokenPoller for ScriptedPoller {
    async fn poll(
        &self,
        client_id: &ClientId,
        device_code: &str,
    ) -> Result<PollOutcome, AuthError> {
        assert_eq!(client_id.as_str(), CLIENT_ID);
        assert_eq!(device_code, DEVICE_CODE);
        self.calls.lock().expect("calls lock").push(Instant::now());
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(Ok(PollOutcome::Pending))
    }
}

#[derive(Default)]
pub struct InMemoryCredentialStore {
    token: Mutex<Option<StoredToken>>,
    stores: Mutex<u32>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_calls(&self) -> u32 {
        *self.stores.lock().expect("store lock")
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn store(&self, token: &StoredToken) -> Result<(), AuthError> {
        *self.stores.lock().expect("store lock") += 1;
        *self.token.lock().expect("token lock") = Some(token.clone());
        Ok(())
    }

    fn load(&self) -> Option<StoredToken> {
        self.token.lock().expect("token lock").clone()
    }

    fn clear(&self) -> Result<(), AuthError> {
        *self.token.lock().expect("token lock") = None;
        Ok(())
    }
}

/// Store whose writes always fail.
#[derive(Default)]
pub struct FailingCredentialStore {
    attempts: Mutex<u32>,
}

impl FailingCredentialStore {
    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().expect("attempts lock")
    }
}

impl CredentialStore for FailingCredentialStore {
    fn store(&self, _token: &StoredToken) -> Result<(), AuthError> {
        *self.attempts.lock().expect("attempts lock") += 1;
        Err(AuthError::StorageFailed("disk full".to_string()))
    }

    fn load(&self) -> Option<StoredToken> {
        None
    }

    fn clear(&self) -> Result<(), AuthError> {
        Ok(())
    }
}
