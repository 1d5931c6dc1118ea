//! Job run data model: lifecycle status, write inputs, and read summaries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage-assigned surrogate key of a job run.
pub type RunId = i64;

/// Lifecycle state of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal status implied by a process exit code.
    pub fn from_exit_code(exit_code: i32) -> Self {
        if exit_code == 0 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown job status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl ToSql for JobStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for JobStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// A run about to start. The storage layer assigns the id and RUNNING status.
#[derive(Debug, Clone)]
pub struct RunningJobRun {
    pub name: String,
    pub script: String,
    pub started_at: DateTime<Utc>,
}

impl RunningJobRun {
    pub fn new(
        name: impl Into<String>,
        script: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            started_at,
        }
    }
}

/// Terminal fields recorded when a tracked run finishes.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub finished_at: DateTime<Utc>,
    pub stdout: String,
    pub stderr: String,
}

/// An already-finished run, inserted in a single step.
///
/// There is no status or duration here: both are derived from `exit_code` and
/// the two timestamps when the row is written.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub name: String,
    pub script: String,
    pub exit_code: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stdout: String,
    pub stderr: String,
}

/// Summary of a persisted run as returned by the listing queries.
///
/// `started_at` is only absent on rows written before the schema required it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRunRow {
    pub id: RunId,
    pub name: String,
    pub script: String,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub status: JobStatus,
}

/// Captured output of a run. Both streams are empty when nothing was recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Format a timestamp the way it is persisted: RFC 3339, microseconds, `Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Error)]
#[error("unrecognized timestamp '{0}'")]
pub struct BadTimestamp(pub String);

/// Parse a persisted timestamp.
///
/// Accepts RFC 3339 as written by this crate, plus naive ISO-8601 text from
/// older rows and SQLite's `datetime('now')` format. Naive values are UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, BadTimestamp> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(BadTimestamp(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_from_exit_code() {
        assert_eq!(JobStatus::from_exit_code(0), JobStatus::Completed);
        assert_eq!(JobStatus::from_exit_code(1), JobStatus::Failed);
        assert_eq!(JobStatus::from_exit_code(-1), JobStatus::Failed);
        assert_eq!(JobStatus::from_exit_code(137), JobStatus::Failed);
    }

    #[test]
    fn test_status_parse() {
        for status in [JobStatus::Running, JobStatus::Completed, JobStatus::Failed] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("paused".parse::<JobStatus>().is_err());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }

    #[test]
    fn test_parse_own_format() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let text = format_timestamp(&ts);
        assert_eq!(text, "2024-01-01T12:00:00.000000Z");
        assert_eq!(parse_timestamp(&text).unwrap(), ts);
    }

    #[test]
    fn test_parse_legacy_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-01T10:00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-01 10:00:00").unwrap(), expected);
        assert_eq!(
            parse_timestamp("2024-01-01T12:00:00+02:00").unwrap(),
            expected
        );
        assert!(parse_timestamp("yesterday").is_err());
    }
}
