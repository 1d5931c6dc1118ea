//! End-to-end tracking: the runner against a real store, with real and
//! scripted executors.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use cronjobz::shell::{CommandExecutor, ExecError, ExecResult};
use cronjobz::storage::RunStore;
use cronjobz::{execute_job, JobRunner, JobStatus, RunnerError};

fn open(dir: &Path) -> RunStore {
    RunStore::open_path(dir.join("test.sqlite")).unwrap()
}

/// Returns a fixed result and remembers the argv it was given.
struct ScriptedExecutor {
    result: ExecResult,
    seen: Arc<Mutex<Vec<Vec<String>>>>,
}

impl CommandExecutor for ScriptedExecutor {
    fn run(&self, argv: &[String]) -> Result<ExecResult, ExecError> {
        self.seen.lock().unwrap().push(argv.to_vec());
        Ok(self.result.clone())
    }
}

/// Fails before any exit code exists.
struct BrokenExecutor;

impl CommandExecutor for BrokenExecutor {
    fn run(&self, _argv: &[String]) -> Result<ExecResult, ExecError> {
        Err(ExecError::Terminated { signal: 9 })
    }
}

#[cfg(unix)]
#[test]
fn test_execute_job_tracks_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());

    let exit_code = execute_job(&store, "test-echo", "echo hello world").unwrap();
    assert_eq!(exit_code, 0);

    assert!(store.list_running_jobs().unwrap().is_empty());

    let runs = store.list_runs(10).unwrap();
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.name, "test-echo");
    assert_eq!(run.script, "echo hello world");
    assert_eq!(run.status, JobStatus::Completed);
    assert_eq!(run.exit_code, Some(0));
    assert!(run.finished_at.unwrap() >= run.started_at.unwrap());
    assert!(run.duration_seconds.unwrap() >= 0.0);

    let output = store.get_run_output(run.id).unwrap();
    assert_eq!(output.stdout, "hello world\n");
    assert_eq!(output.stderr, "");
}

#[cfg(unix)]
#[test]
fn test_fail_job_returns_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());

    let exit_code = execute_job(&store, "fail-job", "false").unwrap();
    assert_eq!(exit_code, 1);

    assert!(store.list_running_jobs().unwrap().is_empty());
    let run = &store.list_runs(1).unwrap()[0];
    assert_eq!(run.name, "fail-job");
    assert_eq!(run.script, "false");
    assert_eq!(run.status, JobStatus::Failed);
    assert_eq!(run.exit_code, Some(1));
    assert!(run.finished_at.is_some());
}

#[cfg(unix)]
#[test]
fn test_script_file_is_executed_and_stored_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());

    let script = dir.path().join("ok.sh");
    std::fs::write(&script, "echo hello\necho oops >&2\nexit 3\n").unwrap();
    let script_str = format!("sh {}", script.display());

    let exit_code = execute_job(&store, "daily-task", &script_str).unwrap();
    assert_eq!(exit_code, 3);

    let run = &store.list_runs(1).unwrap()[0];
    assert_eq!(run.script, script_str);
    assert_eq!(run.status, JobStatus::Failed);
    assert_eq!(run.exit_code, Some(3));

    let output = store.get_run_output(run.id).unwrap();
    assert_eq!(output.stdout, "hello\n");
    assert_eq!(output.stderr, "oops\n");
}

#[test]
fn test_missing_program_is_recorded_then_raised() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());

    let err = execute_job(&store, "ghost", "/no/such/binary --now").unwrap_err();
    let run_id = match err {
        RunnerError::ExecutionFailure { run_id, .. } => run_id,
        other => panic!("unexpected error: {other}"),
    };

    assert!(store.list_running_jobs().unwrap().is_empty());
    let run = &store.list_runs(1).unwrap()[0];
    assert_eq!(run.id, run_id);
    assert_eq!(run.status, JobStatus::Failed);
    assert_eq!(run.exit_code, Some(1));
    assert!(run.finished_at.is_some());

    let output = store.get_run_output(run_id).unwrap();
    assert_eq!(output.stdout, "");
    assert!(output.stderr.starts_with("Job execution failed: "), "{}", output.stderr);
    assert!(output.stderr.contains("/no/such/binary"));
}

#[test]
fn test_empty_script_is_an_execution_failure() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());

    let err = execute_job(&store, "blank", "   ").unwrap_err();
    assert!(matches!(
        err,
        RunnerError::ExecutionFailure {
            source: ExecError::EmptyCommand,
            ..
        }
    ));
    let run = &store.list_runs(1).unwrap()[0];
    assert_eq!(run.script, "   ");
    assert_eq!(run.status, JobStatus::Failed);
}

#[test]
fn test_executor_failure_is_recorded_then_raised() {
    let dir = tempfile::tempdir().unwrap();
    let runner = JobRunner::new(open(dir.path()), BrokenExecutor);

    let err = runner.execute_tracked_job("killed", "sleep 100").unwrap_err();
    assert!(matches!(
        err,
        RunnerError::ExecutionFailure {
            source: ExecError::Terminated { signal: 9 },
            ..
        }
    ));

    let store = runner.store();
    let run = &store.list_runs(1).unwrap()[0];
    assert_eq!(run.status, JobStatus::Failed);
    assert_eq!(run.exit_code, Some(1));
    assert_eq!(
        store.get_run_output(run.id).unwrap().stderr,
        "Job execution failed: process terminated by signal 9"
    );
}

#[test]
fn test_runner_passes_split_argv_and_records_result() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let executor = ScriptedExecutor {
        result: ExecResult {
            exit_code: 0,
            stdout: "ok\n".to_string(),
            stderr: String::new(),
            started_at: now,
            finished_at: now + Duration::seconds(5),
        },
        seen: Arc::clone(&seen),
    };
    let runner = JobRunner::new(open(dir.path()), executor);

    let code = runner
        .execute_tracked_job("nightly-backup", "backup.sh  --full\t/srv")
        .unwrap();
    assert_eq!(code, 0);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![vec!["backup.sh".to_string(), "--full".to_string(), "/srv".to_string()]]
    );

    let run = &runner.store().list_runs(1).unwrap()[0];
    assert_eq!(run.script, "backup.sh  --full\t/srv");
    assert_eq!(run.status, JobStatus::Completed);
    // Duration is measured from the recorded start, not taken from the executor.
    let duration = run.duration_seconds.unwrap();
    assert!(duration > 4.0 && duration < 6.0, "{duration}");
}

#[test]
fn test_finish_time_before_start_is_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let past = Utc::now() - Duration::hours(1);
    let executor = ScriptedExecutor {
        result: ExecResult {
            exit_code: 4,
            stdout: String::new(),
            stderr: "late".to_string(),
            started_at: past,
            finished_at: past,
        },
        seen: Arc::default(),
    };
    let runner = JobRunner::new(open(dir.path()), executor);

    assert_eq!(runner.execute_tracked_job("skew", "x").unwrap(), 4);
    let run = &runner.store().list_runs(1).unwrap()[0];
    assert_eq!(run.status, JobStatus::Failed);
    assert_eq!(run.duration_seconds, Some(0.0));
    assert_eq!(run.finished_at, run.started_at);
}
