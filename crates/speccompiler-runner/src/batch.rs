//! Parallel execution of renderer task batches
//!
//! The render orchestrator collects all external-renderer work for a build
//! and executes it here as one batch: a bounded pool of worker threads
//! drains the task queue, each task observing its own timeout. The batch
//! completes when every task has terminated.

use crate::command_spec::CommandSpec;
use crate::error::RunnerError;
use crate::native::NativeRunner;
use crate::process::{ProcessOutput, ProcessRunner};
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// One unit of work in a batch.
#[derive(Debug, Clone)]
pub struct BatchTask {
    /// The command to execute
    pub cmd: CommandSpec,
    /// Per-task timeout
    pub timeout: Duration,
}

/// Completion record for one batch task, tagged with its input index.
#[derive(Debug)]
pub struct TaskOutcome {
    /// Index of the task in the submitted batch
    pub index: usize,
    /// Process output or spawn/timeout error
    pub result: Result<ProcessOutput, RunnerError>,
}

/// Bounded-concurrency batch executor over [`NativeRunner`].
#[derive(Debug, Clone, Copy)]
pub struct BatchRunner {
    max_concurrency: usize,
}

impl BatchRunner {
    /// Lower bound on worker count.
    pub const MIN_WORKERS: usize = 2;

    /// Create a runner sized to the host: `2..=2*cpus` workers.
    #[must_use]
    pub fn new() -> Self {
        let cpus = thread::available_parallelism().map_or(2, std::num::NonZero::get);
        Self {
            max_concurrency: (cpus * 2).max(Self::MIN_WORKERS),
        }
    }

    /// Create a runner with an explicit worker cap (clamped to at least 2).
    #[must_use]
    pub fn with_concurrency(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(Self::MIN_WORKERS),
        }
    }

    /// Execute every task, returning outcomes sorted by input index.
    ///
    /// Task completion order within the pool is unspecified; the returned
    /// vector is re-sorted so callers can zip it against their task list.
    #[must_use]
    pub fn run_all(&self, tasks: Vec<BatchTask>) -> Vec<TaskOutcome> {
        if tasks.is_empty() {
            return Vec::new();
        }

        let workers = self.max_concurrency.min(tasks.len());
        let queue: Arc<Mutex<VecDeque<(usize, BatchTask)>>> =
            Arc::new(Mutex::new(tasks.into_iter().enumerate().collect()));
        let (tx, rx) = mpsc::channel::<TaskOutcome>();

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                let runner = NativeRunner::new();
                loop {
                    let next = {
                        let mut guard = match queue.lock() {
                            Ok(guard) => guard,
                            Err(_) => return,
                        };
                        guard.pop_front()
                    };
                    let Some((index, task)) = next else { return };
                    let result = runner.run(&task.cmd, task.timeout);
                    if tx.send(TaskOutcome { index, result }).is_err() {
                        return;
                    }
                }
            }));
        }
        drop(tx);

        let mut outcomes: Vec<TaskOutcome> = rx.iter().collect();
        for handle in handles {
            let _ = handle.join();
        }
        outcomes.sort_by_key(|o| o.index);
        outcomes
    }
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new()
    }
}
