//! Crash detection by scanning the reports a server writes on abnormal
//! termination. Report filenames embed a sortable timestamp; the newest one
//! is what the recovery state machine cares about.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Directory inside a server's tree that the server process fills with
/// crash reports.
pub const CRASH_REPORTS_DIR: &str = "crash-reports";

static TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}_\d{2}\.\d{2}\.\d{2}").expect("crash timestamp regex")
});
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H.%M.%S";

pub trait CrashReports: Send + Sync {
    /// Timestamp of the newest crash report for the server, or None when no
    /// report (or no report directory) exists.
    fn latest_crash(&self, server: &str) -> Result<Option<DateTime<Utc>>>;
}

/// [`CrashReports`] over the real per-server `crash-reports` directories.
pub struct FsCrashReports {
    base_dir: PathBuf,
}

impl FsCrashReports {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FsCrashReports {
            base_dir: base_dir.into(),
        }
    }
}

impl CrashReports for FsCrashReports {
    fn latest_crash(&self, server: &str) -> Result<Option<DateTime<Utc>>> {
        let reports_dir = common::server_dir(&self.base_dir, server).join(CRASH_REPORTS_DIR);
        let entries = match fs::read_dir(&reports_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading {}", reports_dir.display()));
            }
        };

        let mut newest: Option<DateTime<Utc>> = None;
        for entry in entries {
            let entry = entry.with_context(|| format!("reading {}", reports_dir.display()))?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            if let Some(stamp) = parse_report_timestamp(&name.to_string_lossy()) {
                newest = Some(newest.map_or(stamp, |prev| prev.max(stamp)));
            }
        }
        Ok(newest)
    }
}

/// Parses the embedded `YYYY-MM-DD_HH.MM.SS` timestamp out of a crash-report
/// filename, if there is one.
pub fn parse_report_timestamp(filename: &str) -> Option<DateTime<Utc>> {
    let matched = TIMESTAMP_RE.find(filename)?;
    NaiveDateTime::parse_from_str(matched.as_str(), TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
