//! On-demand health reporting for the detached polling worker.
//!
//! [`HealthMonitor`] holds no handle to the worker. Every report is rebuilt
//! from the state file, the worker log and the OS process table, and every
//! failure to read one of them degrades to "no data" rather than an error.

pub mod process;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use uuid::Uuid;

use crate::config::AuthPaths;
use crate::worker::log::{short_flow, LogTag, WorkerLog};
use crate::worker::poller::WorkerConfig;
use crate::worker::state::{ErrorRecord, StateFile, WorkerState, WorkerStatus};

pub use process::Liveness;

/// How many recent `ERROR`/`FATAL` lines a report carries.
const RECENT_ERRORS: usize = 5;
/// Log lines scanned for recent errors.
const LOG_SCAN_LINES: usize = 200;
/// A heartbeat older than this many periods means the worker stalled.
const STALE_FACTOR: u32 = 3;

/// Status code for the diagnostics surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthCode {
    Ok,
    Pending,
    Failed,
    Unknown,
}

/// What the monitor concluded about the most recent flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthVerdict {
    /// Terminal `SUCCESS`.
    Succeeded,
    /// Terminal `DENIED`, `EXPIRED` or `FATAL`.
    Failed,
    /// Non-terminal state and a live worker with a fresh heartbeat.
    InProgress,
    /// Non-terminal state but the worker process is gone.
    Crashed,
    /// Worker appears to exist but has not written a heartbeat recently.
    Stalled,
    /// The recorded pid cannot be attributed to the worker.
    Indeterminate,
    /// No readable state file.
    NoData,
}

impl HealthVerdict {
    pub fn code(self) -> HealthCode {
        match self {
            Self::Succeeded => HealthCode::Ok,
            Self::InProgress => HealthCode::Pending,
            Self::Failed | Self::Crashed => HealthCode::Failed,
            Self::Stalled | Self::Indeterminate | Self::NoData => HealthCode::Unknown,
        }
    }
}

/// Human- and machine-readable status of the device flow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub code: HealthCode,
    pub verdict: HealthVerdict,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liveness: Option<Liveness>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_age_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorRecord>,
    pub recent_errors: Vec<String>,
    pub log_path: PathBuf,
    pub credential_present: bool,
}

impl HealthReport {
    fn empty(verdict: HealthVerdict, summary: String, log_path: PathBuf) -> Self {
        Self {
            code: verdict.code(),
            verdict,
            summary,
            flow_id: None,
            status: None,
            pid: None,
            liveness: None,
            attempts: 0,
            remaining_secs: None,
            heartbeat_age_secs: None,
            last_error: None,
            recent_errors: Vec::new(),
            log_path,
            credential_present: false,
        }
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status: {}", self.code)?;
        writeln!(f, "{}", self.summary)?;
        if let (Some(flow_id), Some(status)) = (self.flow_id, self.status) {
            write!(f, "Flow: {} ({status}", short_flow(&flow_id))?;
            if let Some(pid) = self.pid {
                write!(f, ", pid {pid}")?;
            }
            if let Some(liveness) = self.liveness {
                write!(f, ", {liveness}")?;
            }
            writeln!(f, ", {} attempts)", self.attempts)?;
        }
        if let Some(remaining) = self.remaining_secs {
            if remaining > 0 {
                writeln!(f, "Time remaining: {}", format_secs(remaining))?;
            }
        }
        if let Some(error) = &self.last_error {
            writeln!(f, "Last error: [{}] {}", error.code, error.message)?;
        }
        if !self.recent_errors.is_empty() {
            writeln!(f, "Recent errors:")?;
            for line in &self.recent_errors {
                writeln!(f, "  {line}")?;
            }
        }
        writeln!(
            f,
            "Credential: {}",
            if self.credential_present { "stored" } else { "none" }
        )?;
        write!(f, "Log: {}", self.log_path.display())
    }
}

fn format_secs(secs: i64) -> String {
    let (m, s) = (secs / 60, secs % 60);
    if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

type Probe = fn(u32, Option<u64>) -> Liveness;

/// Stateless reader that reconstructs worker status on demand.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    state_file: StateFile,
    log: WorkerLog,
    credential_file: PathBuf,
    heartbeat_period: Duration,
    probe: Probe,
}

impl HealthMonitor {
    pub fn new(paths: &AuthPaths) -> Self {
        Self {
            state_file: StateFile::for_paths(paths),
            log: WorkerLog::for_paths(paths),
            credential_file: paths.credential_file(),
            heartbeat_period: WorkerConfig::default().heartbeat_interval,
            probe: process::probe,
        }
    }

    /// Replace the process-table probe.
    pub fn with_probe(mut self, probe: Probe) -> Self {
        self.probe = probe;
        self
    }

    /// Build a report. Never fails.
    pub fn report(&self) -> HealthReport {
        self.report_at(Utc::now())
    }

    pub fn report_at(&self, now: DateTime<Utc>) -> HealthReport {
        let log_path = self.log.path().to_path_buf();
        let credential_present = self.credential_file.exists();

        let state = match self.state_file.read() {
            Ok(Some(state)) => state,
            Ok(None) => {
                let mut report = HealthReport::empty(
                    HealthVerdict::NoData,
                    if credential_present {
                        "No login flow on record; a stored credential exists.".to_string()
                    } else {
                        "No login flow on record. Run `auth login` to start one.".to_string()
                    },
                    log_path,
                );
                report.credential_present = credential_present;
                return report;
            }
            Err(err) => {
                tracing::warn!(code = %err.code(), "Worker state file unreadable");
                let mut report = HealthReport::empty(
                    HealthVerdict::NoData,
                    format!("Worker state file is unreadable ({}).", err.code()),
                    log_path,
                );
                report.credential_present = credential_present;
                return report;
            }
        };

        let liveness = (!state.is_terminal()).then(|| (self.probe)(state.pid, state.pid_start_ticks));
        let heartbeat_age = (now - state.last_heartbeat_at).num_seconds();
        let (verdict, summary) = self.judge(&state, liveness, heartbeat_age, now);

        HealthReport {
            code: verdict.code(),
            verdict,
            summary,
            flow_id: Some(state.flow_id),
            status: Some(state.status),
            pid: Some(state.pid),
            liveness,
            attempts: state.attempts,
            remaining_secs: Some(state.remaining_secs(now)),
            heartbeat_age_secs: Some(heartbeat_age),
            recent_errors: self.recent_errors(&state.flow_id),
            last_error: state.last_error,
            log_path,
            credential_present,
        }
    }

    fn judge(
        &self,
        state: &WorkerState,
        liveness: Option<Liveness>,
        heartbeat_age: i64,
        now: DateTime<Utc>,
    ) -> (HealthVerdict, String) {
        let reason = state
            .last_error
            .as_ref()
            .map(|e| format!(": [{}] {}", e.code, e.message))
            .unwrap_or_default();
        match state.status {
            WorkerStatus::Success => (
                HealthVerdict::Succeeded,
                "Authenticated. The access token is stored.".to_string(),
            ),
            WorkerStatus::Denied => (
                HealthVerdict::Failed,
                "Authorization was denied by the user.".to_string(),
            ),
            WorkerStatus::Expired => (
                HealthVerdict::Failed,
                "The device code expired before authorization completed.".to_string(),
            ),
            WorkerStatus::Fatal => (
                HealthVerdict::Failed,
                format!("The polling worker gave up{reason}"),
            ),
            WorkerStatus::Started | WorkerStatus::Polling | WorkerStatus::Error => {
                let stale_after = self
                    .heartbeat_period
                    .max(Duration::from_secs(state.interval_secs))
                    .saturating_mul(STALE_FACTOR);
                let stale = heartbeat_age > i64::try_from(stale_after.as_secs()).unwrap_or(i64::MAX);
                match liveness.unwrap_or(Liveness::Unknown) {
                    Liveness::Dead => (
                        HealthVerdict::Crashed,
                        format!(
                            "The polling worker (pid {}) exited while {}; see the log.",
                            state.pid, state.status
                        ),
                    ),
                    Liveness::Reused | Liveness::Unknown => (
                        HealthVerdict::Indeterminate,
                        format!(
                            "Cannot confirm that pid {} is still the polling worker.",
                            state.pid
                        ),
                    ),
                    Liveness::Alive | Liveness::Unverified if stale => (
                        HealthVerdict::Stalled,
                        format!("No heartbeat from the polling worker for {heartbeat_age}s."),
                    ),
                    Liveness::Alive | Liveness::Unverified => {
                        let remaining = state.remaining_secs(now).max(0);
                        (
                            HealthVerdict::InProgress,
                            format!(
                                "Waiting for authorization ({} left, polling every {}s){reason}",
                                format_secs(remaining),
                                state.interval_secs
                            ),
                        )
                    }
                }
            }
        }
    }

    fn recent_errors(&self, flow_id: &Uuid) -> Vec<String> {
        let flow = short_flow(flow_id);
        let mut errors: Vec<String> = self
            .log
            .tail(LOG_SCAN_LINES)
            .into_iter()
            .filter(|line| line.flow == flow && matches!(line.tag, LogTag::Error | LogTag::Fatal))
            .map(|line| format!("{} [{}] {}", line.timestamp.to_rfc3339(), line.tag, line.text))
            .collect();
        if errors.len() > RECENT_ERRORS {
            errors.drain(..errors.len() - RECENT_ERRORS);
        }
        errors
    }
}
