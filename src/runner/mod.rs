//! Tracked execution: record a run, execute it, record how it ended.

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::model::{RunId, RunOutcome, RunningJobRun};
use crate::shell::{self, CommandExecutor, ExecError, ProcessExecutor};
use crate::storage::{RunStore, StorageError};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The command could not be run at all. The run is already recorded as
    /// failed when this is returned.
    #[error("job run {run_id} could not be executed: {source}")]
    ExecutionFailure {
        run_id: RunId,
        #[source]
        source: ExecError,
    },
}

/// Drives one job run through start, execution and finish.
pub struct JobRunner<E = ProcessExecutor> {
    store: RunStore,
    executor: E,
}

impl JobRunner<ProcessExecutor> {
    /// A runner that executes scripts as child processes.
    pub fn with_processes(store: RunStore) -> Self {
        Self::new(store, ProcessExecutor)
    }
}

impl<E: CommandExecutor> JobRunner<E> {
    pub fn new(store: RunStore, executor: E) -> Self {
        Self { store, executor }
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// Execute `script` as a tracked run named `name` and return its exit code.
    ///
    /// A nonzero exit code is returned like any other and leaves the run
    /// `failed`. When the executor cannot produce a result the run is recorded
    /// as failed with exit code 1 and a diagnostic in stderr, and the error is
    /// returned as [`RunnerError::ExecutionFailure`].
    pub fn execute_tracked_job(&self, name: &str, script: &str) -> Result<i32, RunnerError> {
        self.store.initialize()?;

        let started_at = Utc::now();
        let run_id = self
            .store
            .start_run(&RunningJobRun::new(name, script, started_at))?;
        info!(run_id, %name, %script, "job run started");

        let argv = shell::split_script(script);
        match self.executor.run(&argv) {
            Ok(result) => {
                let outcome = RunOutcome {
                    exit_code: result.exit_code,
                    // Never before the recorded start, even if the wall clock stepped back.
                    finished_at: result.finished_at.max(started_at),
                    stdout: result.stdout,
                    stderr: result.stderr,
                };
                let status = self.store.finish_run(run_id, &outcome)?;
                if outcome.exit_code == 0 {
                    info!(run_id, %name, %status, "job run finished");
                } else {
                    warn!(
                        run_id,
                        %name,
                        %status,
                        exit_code = outcome.exit_code,
                        "job run finished"
                    );
                }
                Ok(outcome.exit_code)
            }
            Err(source) => {
                error!(run_id, %name, error = %source, "job execution failed");
                let outcome = RunOutcome {
                    exit_code: 1,
                    finished_at: Utc::now().max(started_at),
                    stdout: String::new(),
                    stderr: format!("Job execution failed: {}", source),
                };
                if let Err(e) = self.store.finish_run(run_id, &outcome) {
                    error!(run_id, error = %e, "failed to record execution failure");
                }
                Err(RunnerError::ExecutionFailure { run_id, source })
            }
        }
    }
}

/// Execute `script` as a tracked run using child processes.
pub fn execute_job(store: &RunStore, name: &str, script: &str) -> Result<i32, RunnerError> {
    JobRunner::with_processes(store.clone()).execute_tracked_job(name, script)
}
