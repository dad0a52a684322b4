//! Append-only, tagged worker log.
//!
//! One line per event: `<rfc3339 UTC> [<TAG>] flow=<8 hex> <text>`.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::config::AuthPaths;
use crate::error::AuthError;
use crate::util::fs::ensure_private_dir;

const ROTATE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LogTag {
    Start,
    Poll,
    Status,
    Success,
    Error,
    Fatal,
}

/// A parsed log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub tag: LogTag,
    pub flow: String,
    pub text: String,
}

impl LogLine {
    pub fn parse(line: &str) -> Option<Self> {
        let (timestamp, rest) = line.split_once(' ')?;
        let timestamp = DateTime::parse_from_rfc3339(timestamp).ok()?.with_timezone(&Utc);
        let rest = rest.strip_prefix('[')?;
        let (tag, rest) = rest.split_once("] ")?;
        let tag = tag.parse().ok()?;
        let rest = rest.strip_prefix("flow=")?;
        let (flow, text) = rest.split_once(' ').unwrap_or((rest, ""));
        Some(Self {
            timestamp,
            tag,
            flow: flow.to_string(),
            text: text.to_string(),
        })
    }
}

/// Short flow identifier used in log lines.
pub fn short_flow(flow_id: &Uuid) -> String {
    flow_id.simple().to_string()[..8].to_string()
}

#[derive(Debug, Clone)]
pub struct WorkerLog {
    path: PathBuf,
}

impl WorkerLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_paths(paths: &AuthPaths) -> Self {
        Self::new(paths.log_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move an oversized log aside to `<name>.1` before a new flow starts.
    pub fn rotate_if_large(&self) -> Result<(), AuthError> {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.len() > ROTATE_BYTES => {
                let mut rotated = self.path.clone().into_os_string();
                rotated.push(".1");
                fs::rename(&self.path, PathBuf::from(rotated))?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Append one tagged line. Newlines in `text` are flattened.
    pub fn append(&self, tag: LogTag, flow_id: &Uuid, text: &str) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            ensure_private_dir(parent)?;
        }
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&self.path)?;

        let line = format!(
            "{} [{tag}] flow={} {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            short_flow(flow_id),
            text.replace(['\n', '\r'], " ")
        );
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Last `max` parseable lines, oldest first. Missing file yields none.
    pub fn tail(&self, max: usize) -> Vec<LogLine> {
        let Ok(file) = fs::File::open(&self.path) else {
            return Vec::new();
        };
        let mut lines: Vec<LogLine> = BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|l| LogLine::parse(&l))
            .collect();
        if lines.len() > max {
            lines.drain(..lines.len() - max);
        }
        lines
    }
}
