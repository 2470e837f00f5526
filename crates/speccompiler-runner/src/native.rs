//! Native subprocess execution with timeout

use crate::command_spec::CommandSpec;
use crate::error::RunnerError;
use crate::process::{ProcessOutput, ProcessRunner};
use std::io::Read;
use std::process::Stdio;
use std::thread;
use std::time::{Duration, Instant};

/// Native process runner using `std::process::Command`.
///
/// Spawns with stdin redirected from the null device and stdout/stderr
/// captured as byte streams. Pipe draining happens on dedicated threads so
/// a chatty renderer cannot deadlock against a full pipe buffer. Timeout is
/// enforced by polling `try_wait` against a deadline; an overdue child is
/// killed and reported as [`RunnerError::Timeout`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeRunner;

impl NativeRunner {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

impl ProcessRunner for NativeRunner {
    fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, RunnerError> {
        let mut command = cmd.to_command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| RunnerError::SpawnFailed {
            program: cmd.program_name(),
            reason: e.to_string(),
        })?;

        let stdout_handle = child.stdout.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                buf
            })
        });
        let stderr_handle = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                buf
            })
        });

        let deadline = Instant::now() + timeout;
        let exit_status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        drain(stdout_handle);
                        drain(stderr_handle);
                        return Err(RunnerError::Timeout {
                            program: cmd.program_name(),
                            timeout_seconds: timeout.as_secs(),
                        });
                    }
                    thread::sleep(WAIT_POLL_INTERVAL);
                }
                Err(e) => {
                    let _ = child.kill();
                    drain(stdout_handle);
                    drain(stderr_handle);
                    return Err(RunnerError::WaitFailed {
                        program: cmd.program_name(),
                        reason: e.to_string(),
                    });
                }
            }
        };

        let stdout = drain(stdout_handle);
        let stderr = drain(stderr_handle);
        Ok(ProcessOutput::new(
            stdout,
            stderr,
            exit_status.code(),
            false,
        ))
    }
}

fn drain(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
