//! Launches the polling worker as a fully detached OS process.
//!
//! The request handler that starts a login is expected to exit as soon as it
//! has answered, so the worker must not share its stdio, process group or
//! session, and the parent never waits on it. Only plain values cross the
//! boundary: flow id, client id, interval and expiry on the command line,
//! the device code in the child's environment (never argv, so it does not
//! show up in `ps`).

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use uuid::Uuid;

use crate::auth::device_code::DeviceAuthorization;
use crate::config::{paths::HOME_ENV, AuthPaths, ClientId};
use crate::error::AuthError;

/// Environment variable carrying the device code into the worker.
pub const DEVICE_CODE_ENV: &str = "DEVICELINK_DEVICE_CODE";

/// Subcommand the worker binary answers to.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Program (and leading arguments) that starts a worker.
///
/// Defaults to the current executable with the `worker` subcommand; an
/// embedding host that links this crate must route that subcommand to
/// [`crate::worker::run_worker`].
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub leading_args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: vec![WORKER_SUBCOMMAND.into()],
        }
    }

    pub fn current_exe() -> Result<Self, AuthError> {
        let program = std::env::current_exe().map_err(|err| AuthError::SpawnFailed {
            program: "<current executable>".to_string(),
            message: err.to_string(),
        })?;
        Ok(Self::new(program))
    }

    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// A worker that was launched; the parent keeps no handle to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnedWorker {
    pub flow_id: Uuid,
    pub pid: u32,
}

#[derive(Debug, Clone)]
pub struct WorkerSupervisor {
    command: WorkerCommand,
    paths: AuthPaths,
    token_url: Option<String>,
}

impl WorkerSupervisor {
    pub fn new(command: WorkerCommand, paths: AuthPaths) -> Self {
        Self {
            command,
            paths,
            token_url: None,
        }
    }

    /// Token endpoint the worker should poll, when not the default.
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    /// Fire-and-forget launch of a worker for `auth`.
    pub fn spawn(
        &self,
        auth: &DeviceAuthorization,
        client_id: &ClientId,
    ) -> Result<SpawnedWorker, AuthError> {
        let flow_id = Uuid::new_v4();
        let mut command = Command::new(&self.command.program);
        command
            .args(&self.command.leading_args)
            .arg("--flow-id")
            .arg(flow_id.to_string())
            .arg("--client-id")
            .arg(client_id.as_str())
            .arg("--interval")
            .arg(auth.poll_interval_secs.to_string())
            .arg("--expires-at")
            .arg(auth.expires_at().to_rfc3339())
            .env(DEVICE_CODE_ENV, &auth.device_code)
            .env(HOME_ENV, self.paths.base_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(url) = &self.token_url {
            command.arg("--token-url").arg(url);
        }
        if let Ok(dir) = std::env::current_dir() {
            command.current_dir(dir);
        }
        detach(&mut command);

        let child = command.spawn().map_err(|err| AuthError::SpawnFailed {
            program: self.command.program.display().to_string(),
            message: err.to_string(),
        })?;
        let pid = child.id();
        // Dropping the handle does not kill or wait on the child.
        drop(child);

        tracing::info!(flow_id = %flow_id, pid, "Polling worker spawned");
        Ok(SpawnedWorker { flow_id, pid })
    }
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: the closure runs in the forked child before exec and only
    // calls setsid(2), which is async-signal-safe.
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid().map_err(std::io::Error::from)?;
            Ok(())
        });
    }
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;

    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}
