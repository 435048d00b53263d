use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time view of a runner's pool.
///
/// `completed`/`failed` count since the current arm; a fresh pool starts at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerCounts {
    pub workers: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Live task counters of one pool, shared with every task's completer.
///
/// Updated before a task's outcome becomes visible on its handle, so a
/// caller that has seen the outcome never reads older counts.
#[derive(Debug, Default)]
pub(crate) struct TaskCounters {
    running: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl TaskCounters {
    pub(crate) fn task_started(&self) {
        self.running.fetch_add(1, Ordering::SeqCst);
    }

    /// `was_running` is false for tasks that end without ever starting.
    pub(crate) fn task_finished(&self, succeeded: bool, was_running: bool) {
        if was_running {
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
        if succeeded {
            self.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn snapshot(&self, workers: usize, queued: usize) -> RunnerCounts {
        RunnerCounts {
            workers,
            queued,
            running: self.running.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_names(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_started_and_finished_tasks() {
        let counters = TaskCounters::default();
        counters.task_started();
        counters.task_started();
        assert_eq!(counters.snapshot(2, 1).running, 2);

        counters.task_finished(true, true);
        counters.task_finished(false, true);
        counters.task_finished(false, false);

        let counts = counters.snapshot(2, 0);
        assert_eq!(
            counts,
            RunnerCounts {
                workers: 2,
                queued: 0,
                running: 0,
                completed: 1,
                failed: 2,
            }
        );
    }
}
