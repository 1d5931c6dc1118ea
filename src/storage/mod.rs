//! SQLite storage layer -- connection pool, schema evolution, run queries.

pub mod runs;
pub mod schema;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::{Pool as R2D2Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use thiserror::Error;
use tracing::info;

use crate::config::StorageConfig;
use crate::model::RunId;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable at {path}: {reason}")]
    Unavailable { path: PathBuf, reason: String },

    #[error("job run {0} not found")]
    RunNotFound(RunId),

    #[error("job run {0} has already finished")]
    AlreadyFinished(RunId),

    #[error("job run {0} has no recorded start time")]
    MissingStartTime(RunId),

    #[error("finished_at {finished_at} is earlier than started_at {started_at}")]
    FinishedBeforeStart {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Durable store of job runs backed by a single SQLite file.
///
/// Cloning is cheap and shares the underlying pool, so one store can be
/// handed to several threads. Independent processes may open the same file;
/// SQLite's locking (WAL plus a busy timeout) serializes their writes.
#[derive(Clone)]
pub struct RunStore {
    pool: Pool,
    path: PathBuf,
}

impl RunStore {
    /// Open (or create) the store described by `config` and bring its schema
    /// up to date.
    pub fn open(config: &StorageConfig) -> StorageResult<Self> {
        let path = config.path.clone();
        let unavailable = |reason: String| StorageError::Unavailable {
            path: path.clone(),
            reason,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    unavailable(format!("cannot create directory {}: {}", parent.display(), e))
                })?;
            }
        }

        // Migrate on a dedicated connection first: a corrupt or unreadable
        // file fails here immediately instead of inside the pool's retries.
        let busy_timeout = config.busy_timeout();
        let mut conn = Connection::open(&path).map_err(|e| unavailable(e.to_string()))?;
        configure_connection(&conn, busy_timeout).map_err(|e| unavailable(e.to_string()))?;
        schema::migrate(&mut conn).map_err(|e| unavailable(e.to_string()))?;
        drop(conn);

        let manager = SqliteConnectionManager::file(&path)
            .with_init(move |c| configure_connection(c, busy_timeout));
        let pool = R2D2Pool::builder()
            .max_size(config.pool_size.max(1))
            .connection_timeout(config.connection_timeout())
            .build(manager)
            .map_err(|e| unavailable(e.to_string()))?;

        info!(path = %path.display(), "run store opened");
        Ok(Self { pool, path })
    }

    /// Open a store at `path` with default connection settings.
    pub fn open_path(path: impl Into<PathBuf>) -> StorageResult<Self> {
        Self::open(&StorageConfig::at(path))
    }

    /// Re-apply schema evolution. Idempotent; existing rows are untouched.
    pub fn initialize(&self) -> StorageResult<()> {
        let unavailable = |reason: String| StorageError::Unavailable {
            path: self.path.clone(),
            reason,
        };
        let mut conn = self.pool.get().map_err(|e| unavailable(e.to_string()))?;
        schema::migrate(&mut conn).map_err(|e| unavailable(e.to_string()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> StorageResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }
}

fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA foreign_keys = ON;",
    )
}
