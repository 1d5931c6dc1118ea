//! Database schema and migrations.
//!
//! Migrations are an ordered list of named steps. Every step checks whether
//! its change is already present before applying it, so the whole list can
//! run on every open, against fresh files and against files written by older
//! versions alike. Columns are only ever added, with safe defaults.

use rusqlite::{params, Connection, TransactionBehavior};
use tracing::{debug, info};

/// One idempotent schema change. `apply` returns whether it changed anything.
pub struct Migration {
    pub name: &'static str,
    apply: fn(&Connection) -> rusqlite::Result<bool>,
}

/// All schema steps, in the order they must run.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "create_job_runs",
        apply: create_job_runs,
    },
    Migration {
        name: "add_job_runs_status",
        apply: add_job_runs_status,
    },
    Migration {
        name: "index_job_runs_status",
        apply: index_job_runs_status,
    },
];

/// Run all pending migrations and return the names of the steps applied.
///
/// Runs inside a `BEGIN IMMEDIATE` transaction so concurrent openers of the
/// same file take turns instead of racing on the existence checks.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<Vec<&'static str>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let mut applied = Vec::new();
    for migration in MIGRATIONS {
        if (migration.apply)(&tx)? {
            tx.execute(
                "INSERT OR IGNORE INTO schema_version (name) VALUES (?1)",
                params![migration.name],
            )?;
            info!(migration = migration.name, "applied schema migration");
            applied.push(migration.name);
        } else {
            debug!(migration = migration.name, "schema migration already present");
        }
    }

    tx.commit()?;
    Ok(applied)
}

pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn index_exists(conn: &Connection, index: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
        params![index],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn create_job_runs(conn: &Connection) -> rusqlite::Result<bool> {
    if table_exists(conn, "job_runs")? {
        return Ok(false);
    }
    conn.execute_batch(
        "CREATE TABLE job_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            script TEXT NOT NULL,
            exit_code INTEGER,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            duration_seconds REAL,
            stdout TEXT NOT NULL DEFAULT '',
            stderr TEXT NOT NULL DEFAULT '',
            status TEXT DEFAULT 'completed'
        );",
    )?;
    Ok(true)
}

// Tables written before run tracking have no status column. Existing rows
// read the default, so they become completed runs without being rewritten.
fn add_job_runs_status(conn: &Connection) -> rusqlite::Result<bool> {
    if column_exists(conn, "job_runs", "status")? {
        return Ok(false);
    }
    conn.execute(
        "ALTER TABLE job_runs ADD COLUMN status TEXT DEFAULT 'completed'",
        [],
    )?;
    Ok(true)
}

fn index_job_runs_status(conn: &Connection) -> rusqlite::Result<bool> {
    if index_exists(conn, "idx_job_runs_status")? {
        return Ok(false);
    }
    conn.execute(
        "CREATE INDEX idx_job_runs_status ON job_runs(status, started_at)",
        [],
    )?;
    Ok(true)
}
