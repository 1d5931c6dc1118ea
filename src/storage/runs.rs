//! Job run lifecycle writes and queries.

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use super::{RunStore, StorageError, StorageResult};
use crate::model::{
    format_timestamp, parse_timestamp, JobRun, JobRunRow, JobStatus, RunId, RunOutcome,
    RunOutput, RunningJobRun,
};

/// Columns read into a [`JobRunRow`]. Legacy rows may hold NULL text and
/// status, which read as empty strings and `completed`.
const SUMMARY_COLUMNS: &str = "id, COALESCE(name, ''), COALESCE(script, ''), exit_code, \
     started_at, finished_at, duration_seconds, COALESCE(status, 'completed')";

/// Timestamps are persisted with microsecond precision. Durations are computed
/// from the truncated values so they agree with what a reader sees.
const STORED_SUBSEC_DIGITS: u16 = 6;

impl RunStore {
    /// Record the start of a tracked run and return its id.
    pub fn start_run(&self, run: &RunningJobRun) -> StorageResult<RunId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO job_runs
               (name, script, started_at, status, exit_code, finished_at, duration_seconds, stdout, stderr)
             VALUES (?1, ?2, ?3, ?4, NULL, NULL, NULL, '', '')",
            params![
                run.name,
                run.script,
                format_timestamp(&run.started_at),
                JobStatus::Running
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(run_id = id, name = %run.name, "inserted running job run");
        Ok(id)
    }

    /// Move a running job run to its terminal state.
    ///
    /// Duration and status are derived here from the stored `started_at` and
    /// `outcome.exit_code`. The read and the update share one immediate
    /// transaction, so readers see either the running row or the finished one.
    pub fn finish_run(&self, run_id: RunId, outcome: &RunOutcome) -> StorageResult<JobStatus> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<(Option<DateTime<Utc>>, JobStatus)> = tx
            .query_row(
                "SELECT started_at, COALESCE(status, 'completed') FROM job_runs WHERE id = ?1",
                params![run_id],
                |row| Ok((optional_timestamp_column(row, 0)?, row.get(1)?)),
            )
            .optional()?;

        let (started_at, current_status) = current.ok_or(StorageError::RunNotFound(run_id))?;
        if current_status.is_terminal() {
            return Err(StorageError::AlreadyFinished(run_id));
        }
        let started_at = started_at.ok_or(StorageError::MissingStartTime(run_id))?;

        let finished_at = outcome.finished_at.trunc_subsecs(STORED_SUBSEC_DIGITS);
        let duration = duration_seconds(started_at, finished_at)?;
        let status = JobStatus::from_exit_code(outcome.exit_code);

        tx.execute(
            "UPDATE job_runs SET
               exit_code = ?1, finished_at = ?2, duration_seconds = ?3,
               stdout = ?4, stderr = ?5, status = ?6
             WHERE id = ?7",
            params![
                outcome.exit_code,
                format_timestamp(&finished_at),
                duration,
                outcome.stdout,
                outcome.stderr,
                status,
                run_id
            ],
        )?;
        tx.commit()?;

        debug!(run_id, %status, duration, "finished job run");
        Ok(status)
    }

    /// Insert a run that already finished, without start/finish tracking.
    pub fn save_completed_run(&self, run: &JobRun) -> StorageResult<RunId> {
        let started_at = run.started_at.trunc_subsecs(STORED_SUBSEC_DIGITS);
        let finished_at = run.finished_at.trunc_subsecs(STORED_SUBSEC_DIGITS);
        let duration = duration_seconds(started_at, finished_at)?;
        let status = JobStatus::from_exit_code(run.exit_code);

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO job_runs
               (name, script, exit_code, started_at, finished_at, duration_seconds, stdout, stderr, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run.name,
                run.script,
                run.exit_code,
                format_timestamp(&started_at),
                format_timestamp(&finished_at),
                duration,
                run.stdout,
                run.stderr,
                status
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The last `limit` runs, newest (highest id) first.
    pub fn list_runs(&self, limit: usize) -> StorageResult<Vec<JobRunRow>> {
        self.list_runs_ordered(limit, true)
    }

    /// The last `limit` runs by id. With `most_recent_first == false` the same
    /// window is returned oldest first.
    pub fn list_runs_ordered(
        &self,
        limit: usize,
        most_recent_first: bool,
    ) -> StorageResult<Vec<JobRunRow>> {
        let window = format!("SELECT {SUMMARY_COLUMNS} FROM job_runs ORDER BY id DESC LIMIT ?1");
        let sql = if most_recent_first {
            window
        } else {
            format!("SELECT * FROM ({window}) ORDER BY 1 ASC")
        };

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit], summary_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every run still in progress, most recently started first.
    pub fn list_running_jobs(&self) -> StorageResult<Vec<JobRunRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM job_runs
             WHERE status = ?1
             ORDER BY started_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map(params![JobStatus::Running], summary_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Captured stdout/stderr of a run. Unknown ids yield empty output.
    pub fn get_run_output(&self, run_id: RunId) -> StorageResult<RunOutput> {
        let conn = self.conn()?;
        let output = conn
            .query_row(
                "SELECT COALESCE(stdout, ''), COALESCE(stderr, '') FROM job_runs WHERE id = ?1",
                params![run_id],
                |row| {
                    Ok(RunOutput {
                        stdout: row.get(0)?,
                        stderr: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(output.unwrap_or_default())
    }
}

fn duration_seconds(started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> StorageResult<f64> {
    (finished_at - started_at)
        .to_std()
        .map(|d| d.as_secs_f64())
        .map_err(|_| StorageError::FinishedBeforeStart {
            started_at,
            finished_at,
        })
}

/// Legacy rows may hold NULL in either timestamp column.
fn optional_timestamp_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        parse_timestamp(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<JobRunRow> {
    Ok(JobRunRow {
        id: row.get(0)?,
        name: row.get(1)?,
        script: row.get(2)?,
        exit_code: row.get(3)?,
        started_at: optional_timestamp_column(row, 4)?,
        finished_at: optional_timestamp_column(row, 5)?,
        duration_seconds: row.get(6)?,
        status: row.get(7)?,
    })
}
