//! Runner error types

use thiserror::Error;

/// Errors raised while spawning or awaiting renderer/writer subprocesses.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to spawn '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Failed to wait for '{program}': {reason}")]
    WaitFailed { program: String, reason: String },

    #[error("'{program}' timed out after {timeout_seconds} seconds")]
    Timeout {
        program: String,
        timeout_seconds: u64,
    },
}
