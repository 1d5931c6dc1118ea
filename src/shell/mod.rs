//! Command execution -- turn a script string into a process and capture what it did.
//!
//! Scripts are split on whitespace and executed directly. There is no
//! intermediate shell, so quotes, pipes, globs and variables are passed to the
//! program literally. Anything that needs shell syntax has to invoke a shell
//! itself, e.g. `sh /path/to/script.sh`.

use std::process::{Command, ExitStatus, Stdio};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process terminated by signal {signal}")]
    Terminated { signal: i32 },

    #[error("process ended without an exit code")]
    NoExitCode,

    #[error("i/o error while waiting for process: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything observed about one finished process.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Runs an already-tokenized command to completion.
///
/// A nonzero exit code is a normal result. `Err` means no exit code could
/// be obtained at all.
pub trait CommandExecutor: Send + Sync {
    fn run(&self, argv: &[String]) -> Result<ExecResult, ExecError>;
}

/// Split a script into an argument vector on Unicode whitespace.
pub fn split_script(script: &str) -> Vec<String> {
    script.split_whitespace().map(str::to_string).collect()
}

/// Executes commands as child processes, blocking until they exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl CommandExecutor for ProcessExecutor {
    fn run(&self, argv: &[String]) -> Result<ExecResult, ExecError> {
        let (program, args) = argv.split_first().ok_or(ExecError::EmptyCommand)?;

        let started_at = Utc::now();
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| ExecError::Spawn {
                program: program.clone(),
                source,
            })?;
        let finished_at = Utc::now();

        let exit_code = exit_code(output.status)?;
        debug!(%program, exit_code, "process exited");

        Ok(ExecResult {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            started_at,
            finished_at,
        })
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> Result<i32, ExecError> {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => Ok(code),
        (None, Some(signal)) => Err(ExecError::Terminated { signal }),
        (None, None) => Err(ExecError::NoExitCode),
    }
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> Result<i32, ExecError> {
    status.code().ok_or(ExecError::NoExitCode)
}
