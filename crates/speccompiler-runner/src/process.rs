//! Process output and the runner trait

use crate::command_spec::CommandSpec;
use crate::error::RunnerError;
use std::time::Duration;

/// Output from a completed (or timed-out) subprocess.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Captured standard output
    pub stdout: Vec<u8>,
    /// Captured standard error
    pub stderr: Vec<u8>,
    /// Exit code (`None` if terminated by signal)
    pub exit_code: Option<i32>,
    /// Whether the execution timed out
    pub timed_out: bool,
}

impl ProcessOutput {
    #[must_use]
    pub fn new(stdout: Vec<u8>, stderr: Vec<u8>, exit_code: Option<i32>, timed_out: bool) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            timed_out,
        }
    }

    /// stdout as a lossy UTF-8 string.
    #[must_use]
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// stderr as a lossy UTF-8 string.
    #[must_use]
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// True iff the process exited 0 and did not time out.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Synchronous process execution.
///
/// Implementations must use argv-style APIs only; no shell string
/// evaluation. Timeout handling is the implementation's responsibility.
pub trait ProcessRunner {
    /// Execute a command, waiting at most `timeout`.
    fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, RunnerError>;
}
