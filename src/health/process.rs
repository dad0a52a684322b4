//! Non-destructive process liveness probing.
//!
//! A pid alone is not an identity: once the worker exits the kernel may hand
//! the same pid to an unrelated process. On Linux the kernel start time
//! (`/proc/<pid>/stat` field 22) recorded by the worker at startup is
//! compared against the live process; a mismatch means the pid was reused.

use serde::Serialize;
use strum::Display;

/// What the process table says about a recorded pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Liveness {
    /// Running and identity confirmed by start time.
    Alive,
    /// A process with this pid exists but its identity cannot be checked
    /// on this platform.
    Unverified,
    /// A process with this pid exists but it is not the recorded worker.
    Reused,
    /// No such process (or only a zombie remains).
    Dead,
    /// The probe itself could not decide.
    Unknown,
}

/// Kernel start time of `pid`, in clock ticks since boot (Linux only).
pub fn start_ticks(pid: u32) -> Option<u64> {
    let stat = read_stat(pid)?;
    // Field 2 (comm) may contain spaces and parens; split after the last ')'.
    // Remaining tokens start at field 3, so field 22 is index 19.
    stat.tokens.get(19)?.parse::<u64>().ok()
}

struct ProcStat {
    tokens: Vec<String>,
}

impl ProcStat {
    fn state(&self) -> Option<&str> {
        self.tokens.first().map(String::as_str)
    }
}

fn read_stat(pid: u32) -> Option<ProcStat> {
    if !cfg!(target_os = "linux") {
        return None;
    }
    let contents = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after_comm = contents.rsplit_once(')')?.1;
    Some(ProcStat {
        tokens: after_comm.split_whitespace().map(str::to_string).collect(),
    })
}

/// Probe `pid` without signalling it.
pub fn probe(pid: u32, expected_start_ticks: Option<u64>) -> Liveness {
    if pid == 0 || pid > i32::MAX as u32 {
        return Liveness::Unknown;
    }

    match exists(pid) {
        Existence::Missing => return Liveness::Dead,
        Existence::Foreign => return Liveness::Reused,
        Existence::Undetermined => return Liveness::Unknown,
        Existence::Present => {}
    }

    let Some(stat) = read_stat(pid) else {
        return Liveness::Unverified;
    };
    if matches!(stat.state(), Some("Z") | Some("X")) {
        return Liveness::Dead;
    }

    let current = stat.tokens.get(19).and_then(|t| t.parse::<u64>().ok());
    match (expected_start_ticks, current) {
        (Some(expected), Some(actual)) if expected == actual => Liveness::Alive,
        (Some(_), Some(_)) => Liveness::Reused,
        _ => Liveness::Unverified,
    }
}

enum Existence {
    Present,
    Missing,
    /// Exists but belongs to another user; never our worker.
    Foreign,
    Undetermined,
}

#[cfg(unix)]
#[allow(clippy::cast_possible_wrap)]
fn exists(pid: u32) -> Existence {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Signal 0 performs the permission and existence checks only.
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => Existence::Present,
        Err(Errno::ESRCH) => Existence::Missing,
        Err(Errno::EPERM) => Existence::Foreign,
        Err(_) => Existence::Undetermined,
    }
}

#[cfg(not(unix))]
fn exists(_pid: u32) -> Existence {
    Existence::Undetermined
}
