//! The polling worker: a state machine that runs in its own detached process.
//!
//! ```text
//! STARTED -> POLLING -> { POLLING | SUCCESS | DENIED | EXPIRED | ERROR }
//! ERROR   -> POLLING (next tick) | FATAL (retry budget exhausted)
//! ```
//!
//! Two independent timers drive a single-threaded loop: the poll tick,
//! whose cadence follows the provider interval, and a fixed heartbeat that
//! refreshes `lastHeartbeatAt` so observers can tell a slow worker from a
//! dead one. The worker is the only writer of its state file.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use super::log::{LogTag, WorkerLog};
use super::state::{ErrorRecord, StateFile, WorkerState, WorkerStatus};
use crate::auth::device_code::{slowed_interval, PollOutcome, TokenPoller, MAX_INTERVAL_SECS};
use crate::auth::token::StoredToken;
use crate::auth::vault::CredentialStore;
use crate::config::ClientId;
use crate::error::AuthError;
use crate::health::process;
use crate::util::retry::RetryPolicy;

/// Value-type inputs handed to the worker across the process boundary.
#[derive(Clone)]
pub struct WorkerJob {
    pub flow_id: Uuid,
    pub client_id: ClientId,
    pub device_code: String,
    pub interval_secs: u64,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for WorkerJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerJob")
            .field("flow_id", &self.flow_id)
            .field("client_id", &self.client_id)
            .field("device_code", &"[redacted]")
            .field("interval_secs", &self.interval_secs)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Timing and retry knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub heartbeat_interval: Duration,
    /// Consecutive transient errors tolerated before FATAL.
    pub error_budget: u32,
    /// Backoff for transient poll errors; grows from the poll interval.
    pub max_backoff: Duration,
    pub storage_attempts: u32,
    pub storage_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            error_budget: 5,
            max_backoff: Duration::from_secs(60),
            storage_attempts: 3,
            storage_backoff: Duration::from_secs(1),
        }
    }
}

/// What the worker did, for the caller's exit path and for tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub flow_id: Uuid,
    pub status: WorkerStatus,
    pub attempts: u32,
    /// Status written on each transition or poll tick (heartbeats excluded).
    pub history: Vec<WorkerStatus>,
    /// Another flow took over the state file while this one ran.
    pub superseded: bool,
}

enum Tick {
    Continue(Duration),
    Done,
}

pub struct PollingWorker {
    job: WorkerJob,
    poller: Arc<dyn TokenPoller>,
    store: Arc<dyn CredentialStore>,
    state_file: StateFile,
    log: WorkerLog,
    config: WorkerConfig,
    state: WorkerState,
    history: Vec<WorkerStatus>,
    superseded: bool,
    consecutive_errors: u32,
}

impl PollingWorker {
    pub fn new(
        job: WorkerJob,
        poller: Arc<dyn TokenPoller>,
        store: Arc<dyn CredentialStore>,
        state_file: StateFile,
        log: WorkerLog,
    ) -> Self {
        let now = Utc::now();
        let pid = std::process::id();
        let state = WorkerState {
            flow_id: job.flow_id,
            status: WorkerStatus::Started,
            pid,
            pid_start_ticks: process::start_ticks(pid),
            started_at: now,
            last_heartbeat_at: now,
            attempts: 0,
            expires_at: job.expires_at,
            interval_secs: job.interval_secs.clamp(1, MAX_INTERVAL_SECS),
            updated_at: now,
            last_error: None,
        };
        Self {
            job,
            poller,
            store,
            state_file,
            log,
            config: WorkerConfig::default(),
            state,
            history: Vec::new(),
            superseded: false,
            consecutive_errors: 0,
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Run to a terminal state.
    ///
    /// Only failing to write the very first `STARTED` state is returned as an
    /// error; after that every failure is recorded in the state file and log.
    pub async fn run(mut self) -> Result<WorkerReport, AuthError> {
        if let Err(err) = self.log.rotate_if_large() {
            tracing::warn!(flow_id = %self.job.flow_id, error = %err, "Worker log rotation failed");
        }
        // A fresh flow claims the state file unconditionally.
        self.state_file.write(&self.state)?;
        self.history.push(WorkerStatus::Started);
        self.log_line(
            LogTag::Start,
            &format!(
                "pid={} client_id={} interval={}s expires_at={}",
                self.state.pid,
                self.job.client_id,
                self.state.interval_secs,
                self.job.expires_at.to_rfc3339()
            ),
        );
        tracing::info!(flow_id = %self.job.flow_id, "Polling worker started");

        let heartbeat_every = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut next_poll = self.poll_at(self.interval());
        loop {
            tokio::select! {
                _ = heartbeat.tick() => self.heartbeat(),
                _ = tokio::time::sleep_until(next_poll) => {
                    match self.tick(&mut heartbeat).await {
                        Tick::Continue(delay) => next_poll = self.poll_at(delay),
                        Tick::Done => break,
                    }
                }
            }
        }

        tracing::info!(
            flow_id = %self.job.flow_id,
            status = %self.state.status,
            attempts = self.state.attempts,
            "Polling worker finished"
        );
        Ok(WorkerReport {
            flow_id: self.job.flow_id,
            status: self.state.status,
            attempts: self.state.attempts,
            history: self.history,
            superseded: self.superseded,
        })
    }

    async fn tick(&mut self, heartbeat: &mut Interval) -> Tick {
        self.state.attempts += 1;
        self.transition(WorkerStatus::Polling, None);
        let attempt = self.state.attempts;

        if Utc::now() >= self.job.expires_at {
            self.log_line(LogTag::Status, &format!("attempt={attempt} expired before poll"));
            self.transition(WorkerStatus::Expired, None);
            return Tick::Done;
        }

        // Keep heartbeating while a slow request is in flight.
        let poller = Arc::clone(&self.poller);
        let client_id = self.job.client_id.clone();
        let device_code = self.job.device_code.clone();
        let request = async move { poller.poll(&client_id, &device_code).await };
        tokio::pin!(request);
        let outcome = loop {
            tokio::select! {
                outcome = &mut request => break outcome,
                _ = heartbeat.tick() => self.heartbeat(),
            }
        };

        match outcome {
            Ok(PollOutcome::Pending) => {
                self.consecutive_errors = 0;
                self.log_line(LogTag::Poll, &format!("attempt={attempt} result=pending"));
                Tick::Continue(self.interval())
            }
            Ok(PollOutcome::SlowDown { interval_secs }) => {
                self.consecutive_errors = 0;
                let next = slowed_interval(self.state.interval_secs, interval_secs);
                self.state.interval_secs = self.state.interval_secs.max(next);
                self.log_line(
                    LogTag::Poll,
                    &format!(
                        "attempt={attempt} result=slow_down interval={}s",
                        self.state.interval_secs
                    ),
                );
                Tick::Continue(self.interval())
            }
            Ok(PollOutcome::Authorized(token)) => {
                self.log_line(LogTag::Poll, &format!("attempt={attempt} result=authorized"));
                self.complete(token).await;
                Tick::Done
            }
            Ok(PollOutcome::Denied) => {
                self.log_line(LogTag::Status, &format!("attempt={attempt} access denied by user"));
                self.transition(WorkerStatus::Denied, None);
                Tick::Done
            }
            Ok(PollOutcome::Expired) => {
                self.log_line(LogTag::Status, &format!("attempt={attempt} device code expired"));
                self.transition(WorkerStatus::Expired, None);
                Tick::Done
            }
            Err(err) if err.is_transient() => {
                self.consecutive_errors += 1;
                self.log_line(
                    LogTag::Error,
                    &format!(
                        "attempt={attempt} code={} consecutive={} {err}",
                        err.code(),
                        self.consecutive_errors
                    ),
                );
                self.transition(WorkerStatus::Error, Some(ErrorRecord::from(&err)));
                if self.consecutive_errors > self.config.error_budget {
                    self.fail(&err, "retry budget exhausted");
                    return Tick::Done;
                }
                Tick::Continue(self.backoff(&err))
            }
            Err(err) => {
                self.log_line(
                    LogTag::Error,
                    &format!("attempt={attempt} code={} {err}", err.code()),
                );
                self.transition(WorkerStatus::Error, Some(ErrorRecord::from(&err)));
                self.fail(&err, "non-retryable provider error");
                Tick::Done
            }
        }
    }

    /// Persist the token, then record SUCCESS. The credential is written
    /// before the terminal state so SUCCESS always implies a stored token.
    async fn complete(&mut self, token: StoredToken) {
        if self.check_superseded() && self.newer_flow_is_terminal() {
            self.log_line(
                LogTag::Status,
                "superseded by a newer flow that already finished; discarding late token",
            );
            return;
        }

        let policy = RetryPolicy {
            max_attempts: self.config.storage_attempts.max(1),
            initial_backoff: self.config.storage_backoff,
            max_backoff: self.config.storage_backoff * 4,
            multiplier: 2.0,
            jitter: false,
        };
        let store = Arc::clone(&self.store);
        let token = &token;
        let stored = policy
            .execute(|_| true, move || {
                let store = Arc::clone(&store);
                async move { store.store(token) }
            })
            .await;

        match stored {
            Ok(()) => {
                self.consecutive_errors = 0;
                self.transition(WorkerStatus::Success, None);
                self.log_line(
                    LogTag::Success,
                    &format!(
                        "attempts={} scopes={}",
                        self.state.attempts,
                        token.scopes().join(",")
                    ),
                );
            }
            Err(err) => {
                self.log_line(LogTag::Error, &format!("code={} {err}", err.code()));
                self.transition(WorkerStatus::Error, Some(ErrorRecord::from(&err)));
                self.fail(&err, "token could not be stored");
            }
        }
    }

    fn fail(&mut self, err: &AuthError, reason: &str) {
        self.transition(WorkerStatus::Fatal, Some(ErrorRecord::from(err)));
        self.log_line(LogTag::Fatal, &format!("code={} {reason}: {err}", err.code()));
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.state.interval_secs)
    }

    /// When the next poll fires. Never later than one second past expiry, so
    /// an oversized delay ends in EXPIRED instead of outliving the code.
    fn poll_at(&self, delay: Duration) -> Instant {
        let until_expiry = (self.job.expires_at - Utc::now())
            .to_std()
            .unwrap_or_default();
        let delay = delay
            .min(Duration::from_secs(MAX_INTERVAL_SECS))
            .min(until_expiry.saturating_add(Duration::from_secs(1)));
        Instant::now() + delay
    }

    fn backoff(&self, err: &AuthError) -> Duration {
        let policy = RetryPolicy {
            max_attempts: self.config.error_budget,
            initial_backoff: self.interval(),
            max_backoff: self.config.max_backoff.max(self.interval()),
            multiplier: 2.0,
            jitter: true,
        };
        let mut delay = policy.delay_for(self.consecutive_errors).max(self.interval());
        if let AuthError::RateLimited {
            retry_after_secs: Some(secs),
            ..
        } = err
        {
            delay = delay.max(Duration::from_secs(*secs));
        }
        delay
    }

    /// Record a status change (or poll tick) and persist it.
    fn transition(&mut self, status: WorkerStatus, error: Option<ErrorRecord>) {
        self.state.status = status;
        if error.is_some() || status == WorkerStatus::Polling {
            self.state.last_error = error;
        }
        self.history.push(status);
        if let Err(err) = self.persist() {
            tracing::warn!(flow_id = %self.job.flow_id, code = %err.code(), "State write failed");
        }
    }

    fn heartbeat(&mut self) {
        self.state.last_heartbeat_at = Utc::now();
        if let Err(err) = self.persist() {
            tracing::warn!(flow_id = %self.job.flow_id, code = %err.code(), "Heartbeat write failed");
        }
    }

    /// Write the state file unless a newer flow has claimed it.
    fn persist(&mut self) -> Result<(), AuthError> {
        if self.check_superseded() {
            return Ok(());
        }
        let now = Utc::now();
        self.state.updated_at = now;
        self.state.last_heartbeat_at = now;
        self.state_file.write(&self.state)
    }

    fn check_superseded(&mut self) -> bool {
        if self.superseded {
            return true;
        }
        if let Ok(Some(current)) = self.state_file.read() {
            if current.flow_id != self.job.flow_id {
                self.superseded = true;
                self.log_line(
                    LogTag::Status,
                    &format!("superseded by flow {}; no further state writes", current.flow_id),
                );
            }
        }
        self.superseded
    }

    fn newer_flow_is_terminal(&self) -> bool {
        matches!(
            self.state_file.read(),
            Ok(Some(current)) if current.flow_id != self.job.flow_id && current.is_terminal()
        )
    }

    fn log_line(&self, tag: LogTag, text: &str) {
        if let Err(err) = self.log.append(tag, &self.job.flow_id, text) {
            tracing::warn!(flow_id = %self.job.flow_id, error = %err, "Worker log write failed");
        }
    }
}
