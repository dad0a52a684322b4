use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::device_code::DeviceFlowInitiator;
use super::token::StoredToken;
use super::vault::{CredentialStore, CredentialVault};
use crate::config::{AuthPaths, ClientIdResolver, ConfigStore, ProviderEndpoints, DEFAULT_SCOPES};
use crate::error::AuthError;
use crate::health::{HealthMonitor, HealthReport};
use crate::worker::{WorkerCommand, WorkerSupervisor};

/// What the caller shows the user after [`AuthService::start_login`].
///
/// The worker is already running when this is returned; the handler can
/// answer and exit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginStarted {
    pub flow_id: Uuid,
    pub worker_pid: u32,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_at: DateTime<Utc>,
    pub interval_secs: u64,
    pub client_id: String,
    pub client_id_source: &'static str,
}

/// Handler-facing facade over the device flow.
///
/// Holds only per-request context (paths, endpoints, worker command). All
/// I/O decisions such as printing or exit codes belong to the caller.
///
/// # Example
/// ```no_run
/// use devicelink::auth::AuthService;
/// use devicelink::config::AuthPaths;
///
/// # async fn example() -> devicelink::error::Result<()> {
/// let svc = AuthService::new(AuthPaths::from_env());
/// let started = svc.start_login(&[]).await?;
/// println!("Open {} and enter {}", started.verification_uri, started.user_code);
/// # Ok(())
/// # }
/// ```
pub struct AuthService {
    paths: AuthPaths,
    endpoints: ProviderEndpoints,
    resolver: ClientIdResolver,
    store: Arc<dyn CredentialStore>,
    worker_command: Option<WorkerCommand>,
}

impl AuthService {
    pub fn new(paths: AuthPaths) -> Self {
        Self {
            resolver: ClientIdResolver::new(ConfigStore::for_paths(&paths)),
            store: Arc::new(CredentialVault::new(&paths)),
            endpoints: ProviderEndpoints::default(),
            worker_command: None,
            paths,
        }
    }

    pub fn with_endpoints(mut self, endpoints: ProviderEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_resolver(mut self, resolver: ClientIdResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = store;
        self
    }

    /// Program that runs the worker; defaults to the current executable.
    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        self.worker_command = Some(command);
        self
    }

    pub fn paths(&self) -> &AuthPaths {
        &self.paths
    }

    /// Resolve the client id, request a device code and launch the worker.
    ///
    /// Empty `scopes` means the default set.
    pub async fn start_login(&self, scopes: &[String]) -> Result<LoginStarted, AuthError> {
        let (client_id, source) = self.resolver.resolve_with_source()?;
        let scopes: Vec<String> = if scopes.is_empty() {
            DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect()
        } else {
            scopes.to_vec()
        };

        let authorization = DeviceFlowInitiator::new(&self.endpoints)
            .initiate(&client_id, &scopes)
            .await?;

        let command = match &self.worker_command {
            Some(command) => command.clone(),
            None => WorkerCommand::current_exe()?,
        };
        let supervisor = WorkerSupervisor::new(command, self.paths.clone())
            .with_token_url(self.endpoints.token_url.clone());
        let spawned = supervisor.spawn(&authorization, &client_id)?;

        Ok(LoginStarted {
            flow_id: spawned.flow_id,
            worker_pid: spawned.pid,
            user_code: authorization.user_code.clone(),
            verification_uri: authorization.verification_uri.clone(),
            expires_at: authorization.expires_at(),
            interval_secs: authorization.poll_interval_secs,
            client_id: client_id.as_str().to_string(),
            client_id_source: source.label(),
        })
    }

    /// Current flow status. Never fails.
    pub fn status(&self) -> HealthReport {
        HealthMonitor::new(&self.paths).report()
    }

    /// Delete the stored credential.
    pub fn logout(&self) -> Result<(), AuthError> {
        self.store.clear()?;
        tracing::info!("Stored credential cleared");
        Ok(())
    }

    /// The stored token, if any can be decrypted.
    pub fn access_token(&self) -> Option<StoredToken> {
        self.store.load()
    }
}
