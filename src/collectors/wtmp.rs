//! Login history annotations from `wtmp`
//!
//! The collector owns no resource. When a report is built it reads the
//! system's login record file (glibc `struct utmp`, 384 bytes per record),
//! pairs every login with its logout, and lists the login sessions that
//! were active between the two compared sessions or at the moment a changed
//! resource was modified. The list lands in `extra["relevant_wtmp"]`.

use crate::collector::Collector;
use crate::error::CollectorError;
use crate::session_diff::SessionDiff;
use crate::types::now;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

/// Size of one `struct utmp` record on Linux
pub const RECORD_SIZE: usize = 384;

/// Key of the annotation added to session diffs
pub const RELEVANT_WTMP: &str = "relevant_wtmp";

const BOOT_TIME: i16 = 2;
const USER_PROCESS: i16 = 7;
const DEAD_PROCESS: i16 = 8;

/// Settings of the `[wtmp]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WtmpSettings {
    /// Location of the login record file
    pub path: PathBuf,
}

impl Default for WtmpSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/log/wtmp"),
        }
    }
}

/// One decoded login record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtmpRecord {
    /// Record type (`USER_PROCESS`, `DEAD_PROCESS`, ...)
    pub kind: i16,
    /// Process id of the login process
    pub pid: i32,
    /// Terminal name without the `/dev/` prefix
    pub line: String,
    /// Login name, empty on logout records
    pub user: String,
    /// Remote host name or address
    pub host: String,
    /// When the record was written
    pub time: DateTime<Utc>,
}

/// A login paired with its end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSession {
    /// Login name
    pub user: String,
    /// Terminal the user logged in on
    pub line: String,
    /// Remote host, empty for local logins
    pub host: String,
    /// Login time
    pub start: DateTime<Utc>,
    /// Logout or reboot time, `open_end` for sessions still open
    pub end: DateTime<Utc>,
}

impl LoginSession {
    /// Whether `t` lies strictly inside the session
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start < t && t < self.end
    }

    /// Whether the session overlaps the open interval `(from, to)`
    pub fn overlaps(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.contains(from) || self.contains(to) || (from < self.start && self.start < to) || (from < self.end && self.end < to)
    }
}

impl std::fmt::Display for LoginSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";
        write!(
            f,
            "{} - {} {} {}@{}",
            self.start.format(FORMAT),
            self.end.format(FORMAT),
            self.user,
            self.line,
            self.host
        )
    }
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn i32_at(record: &[u8], offset: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&record[offset..offset + 4]);
    i32::from_ne_bytes(raw)
}

/// Decode a buffer of records; a trailing partial record is ignored
pub fn parse_records(buf: &[u8]) -> Vec<UtmpRecord> {
    buf.chunks_exact(RECORD_SIZE)
        .filter_map(|record| {
            let kind = i16::from_ne_bytes([record[0], record[1]]);
            let sec = i32_at(record, 340);
            let usec = i32_at(record, 344).clamp(0, 999_999);
            let time = DateTime::from_timestamp(i64::from(sec), usec as u32 * 1000)?;
            Some(UtmpRecord {
                kind,
                pid: i32_at(record, 4),
                line: c_string(&record[8..40]),
                user: c_string(&record[44..76]),
                host: c_string(&record[76..332]),
                time,
            })
        })
        .collect()
}

/// Pair every login with the next logout on the same line or the next boot
///
/// Logins without an end are still open and end at `open_end`.
pub fn login_sessions(records: &[UtmpRecord], open_end: DateTime<Utc>) -> Vec<LoginSession> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.kind == USER_PROCESS)
        .map(|(idx, login)| {
            let end = records[idx + 1..]
                .iter()
                .find(|r| r.kind == BOOT_TIME || (r.kind == DEAD_PROCESS && r.line == login.line))
                .map_or(open_end, |r| r.time);
            LoginSession {
                user: login.user.clone(),
                line: login.line.clone(),
                host: login.host.clone(),
                start: login.time,
                end,
            }
        })
        .collect()
}

/// Annotates reports with overlapping login sessions
#[derive(Debug, Clone)]
pub struct WtmpCollector {
    path: PathBuf,
}

impl WtmpCollector {
    /// Create a collector reading `settings.path`
    pub fn new(settings: WtmpSettings) -> Self {
        Self { path: settings.path }
    }

    /// Login sessions recorded in the file, or `None` if it does not exist
    pub fn read_sessions(&self) -> std::io::Result<Option<Vec<LoginSession>>> {
        match fs::read(&self.path) {
            Ok(buf) => Ok(Some(login_sessions(&parse_records(&buf), now()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Login sessions relevant to `diff`, rendered one per line, sorted and unique
pub fn relevant_sessions(diff: &SessionDiff, sessions: &[LoginSession]) -> BTreeSet<String> {
    let (from, to) = (diff.old.stamp, diff.new.stamp);
    let mut relevant: BTreeSet<String> = sessions
        .iter()
        .filter(|s| s.overlaps(from, to))
        .map(ToString::to_string)
        .collect();

    for field_diff in &diff.diffs {
        let changed_at = ["mtime", "ctime"]
            .iter()
            .filter_map(|name| field_diff.changed.get(*name))
            .filter_map(|(_, new)| new.as_timestamp())
            .last();
        if let Some(t) = changed_at {
            relevant.extend(sessions.iter().filter(|s| s.contains(t)).map(ToString::to_string));
        }
    }
    relevant
}

impl Collector for WtmpCollector {
    fn label(&self) -> &str {
        "wtmp"
    }

    fn process_diff(&self, diff: &mut SessionDiff) -> Result<(), CollectorError> {
        let Some(sessions) = self.read_sessions()? else {
            debug!(path = %self.path.display(), "no wtmp file");
            return Ok(());
        };

        let relevant = relevant_sessions(diff, &sessions);
        if !relevant.is_empty() {
            let text: String = relevant.iter().map(|line| format!("{}\n", line)).collect();
            diff.extra.insert(RELEVANT_WTMP.to_string(), text);
        }
        Ok(())
    }
}
