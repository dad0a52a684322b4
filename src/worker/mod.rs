//! The detached polling worker and the filesystem protocol it shares with
//! later observers: a state file, overwritten per run, and an append-only
//! log.

pub mod log;
pub mod poller;
pub mod state;
pub mod supervisor;

pub use log::{LogLine, LogTag, WorkerLog};
pub use poller::{PollingWorker, WorkerConfig, WorkerJob, WorkerReport};
pub use state::{ErrorRecord, StateFile, WorkerState, WorkerStatus};
pub use supervisor::{SpawnedWorker, WorkerCommand, WorkerSupervisor, DEVICE_CODE_ENV};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::device_code::HttpTokenPoller;
use crate::auth::vault::CredentialVault;
use crate::config::{AuthPaths, ClientId, ProviderEndpoints};
use crate::error::AuthError;

/// Arguments the supervisor passes on the worker's command line.
#[derive(Debug, Clone)]
pub struct WorkerArgs {
    pub flow_id: Uuid,
    pub client_id: String,
    pub interval_secs: u64,
    pub expires_at: DateTime<Utc>,
    pub token_url: Option<String>,
}

/// Worker process entry point.
///
/// Reads the device code from [`DEVICE_CODE_ENV`], polls to a terminal
/// state and returns. Argument problems are written to the worker log as
/// `FATAL` lines, since the process has no stdio to report them on.
pub async fn run_worker(args: WorkerArgs, paths: AuthPaths) -> Result<WorkerReport, AuthError> {
    let log = WorkerLog::for_paths(&paths);
    let job = match build_job(&args) {
        Ok(job) => job,
        Err(err) => {
            if let Err(log_err) = log.append(
                LogTag::Fatal,
                &args.flow_id,
                &format!("code={} {err}", err.code()),
            ) {
                tracing::warn!(flow_id = %args.flow_id, error = %log_err, "Worker log write failed");
            }
            return Err(err);
        }
    };

    let mut endpoints = ProviderEndpoints::default();
    if let Some(url) = args.token_url {
        endpoints.token_url = url;
    }
    let worker = PollingWorker::new(
        job,
        Arc::new(HttpTokenPoller::new(&endpoints)),
        Arc::new(CredentialVault::new(&paths)),
        StateFile::for_paths(&paths),
        log,
    );
    worker.run().await
}

fn build_job(args: &WorkerArgs) -> Result<WorkerJob, AuthError> {
    let client_id = ClientId::parse(&args.client_id, "worker --client-id")
        .map_err(|err| AuthError::InvalidWorkerArgs(err.to_string()))?;
    if args.interval_secs == 0 {
        return Err(AuthError::InvalidWorkerArgs(
            "--interval must be positive".to_string(),
        ));
    }
    let device_code = std::env::var(DEVICE_CODE_ENV)
        .ok()
        .filter(|code| !code.is_empty())
        .ok_or_else(|| AuthError::InvalidWorkerArgs(format!("{DEVICE_CODE_ENV} is not set")))?;
    Ok(WorkerJob {
        flow_id: args.flow_id,
        client_id,
        device_code,
        interval_secs: args.interval_secs,
        expires_at: args.expires_at,
    })
}
