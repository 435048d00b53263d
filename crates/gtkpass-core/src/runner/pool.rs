//! WorkerPool - 固定数のワーカースレッドと FIFO キュー
//!
//! # 実装詳細
//! - `Mutex<QueueState>` + `Condvar` でジョブを配送（blocking pop）
//! - `close()` 後もキューに残ったジョブは全て実行してから終了する（drain）
//! - ワーカーの終了は `live_workers` と `exited` Condvar で数える
//! - join の上限を超えたら未着手のジョブは捨てる（handle 側は `Abandoned`）
//! - タスク数のカウンタは `TaskCounters` に置き、各 `Completer` が更新する
//!
//! ジョブ自体が panic を捕捉するので、ワーカーループが巻き戻ることはない前提。

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, trace};

use super::state::TaskStatus;
use crate::error::RunnerError;
use crate::ids::TaskId;
use crate::observability::{RunnerCounts, TaskCounters};

/// A type-erased unit of work. Returns how it ended, for logging.
pub(crate) type Job = Box<dyn FnOnce() -> TaskStatus + Send + 'static>;

struct QueuedJob {
    id: TaskId,
    job: Job,
}

struct QueueState {
    jobs: VecDeque<QueuedJob>,
    closed: bool,
    live_workers: usize,
}

struct Shared {
    queue: Mutex<QueueState>,
    /// Signalled on push and on close.
    available: Condvar,
    /// Signalled whenever a worker exits.
    exited: Condvar,
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<TaskCounters>,
    capacity: usize,
}

impl WorkerPool {
    /// Spawn exactly `capacity` named workers.
    ///
    /// If the OS refuses a thread, the workers already started are shut
    /// down before the error is returned.
    pub(crate) fn spawn(capacity: usize, name_prefix: &str) -> Result<Self, RunnerError> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                closed: false,
                live_workers: 0,
            }),
            available: Condvar::new(),
            exited: Condvar::new(),
        });

        let pool = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(capacity)),
            counters: Arc::new(TaskCounters::default()),
            capacity,
        };

        for index in 0..capacity {
            let name = format!("{name_prefix}-{index}");
            let worker_shared = Arc::clone(&pool.shared);

            // count before spawning so a concurrent shutdown never sees 0 too early
            pool.shared.lock_queue().live_workers += 1;
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(index, worker_shared));

            match spawned {
                Ok(join) => pool.lock_workers().push(join),
                Err(source) => {
                    pool.shared.lock_queue().live_workers -= 1;
                    if let Err(e) = pool.shutdown(None) {
                        error!(error = %e, "failed to release partially spawned pool");
                    }
                    return Err(RunnerError::Spawn { name, source });
                }
            }
        }

        Ok(pool)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue a job. Fails with `NotArmed` once the pool has been closed.
    pub(crate) fn execute(&self, id: TaskId, job: Job) -> Result<(), RunnerError> {
        {
            let mut queue = self.shared.lock_queue();
            if queue.closed {
                return Err(RunnerError::NotArmed);
            }
            queue.jobs.push_back(QueuedJob { id, job });
        }
        // notify outside the lock
        self.shared.available.notify_one();
        Ok(())
    }

    /// Counters every task submitted to this pool must report to.
    pub(crate) fn counters(&self) -> Arc<TaskCounters> {
        Arc::clone(&self.counters)
    }

    pub(crate) fn counts(&self) -> RunnerCounts {
        let queued = self.shared.lock_queue().jobs.len();
        self.counters.snapshot(self.capacity, queued)
    }

    /// Worker threads that have not exited yet, detached ones included.
    pub(crate) fn live_workers(&self) -> usize {
        self.shared.lock_queue().live_workers
    }

    /// Stop accepting jobs, let the workers drain the queue, then join them.
    ///
    /// Without a bound this is a pure drain: queued and in-flight work runs
    /// to completion. With `join_timeout` set and elapsed, jobs not yet
    /// started are dropped (their handles end as `Abandoned`), workers still
    /// busy are detached, and `Teardown` is returned. Teardown is never
    /// retried; see [`live_workers`](Self::live_workers) for the stragglers.
    pub(crate) fn shutdown(&self, join_timeout: Option<Duration>) -> Result<(), RunnerError> {
        self.close();

        if let Some(bound) = join_timeout {
            let queue = self.shared.lock_queue();
            let (mut queue, _) = self
                .shared
                .exited
                .wait_timeout_while(queue, bound, |q| q.live_workers > 0)
                .unwrap_or_else(PoisonError::into_inner);
            let stuck = queue.live_workers;
            let dropped = if stuck > 0 {
                std::mem::take(&mut queue.jobs)
            } else {
                VecDeque::new()
            };
            drop(queue);

            if stuck > 0 {
                // completers run their Drop here, outside the queue lock
                let abandoned = dropped.len();
                drop(dropped);
                // detach the stragglers; they exit on their own once their work returns
                self.lock_workers().clear();
                let msg = format!("{stuck} worker(s) still busy after {bound:?}");
                error!(stuck, abandoned, ?bound, "worker pool did not drain in time");
                return Err(RunnerError::Teardown(msg));
            }
        }

        let workers = std::mem::take(&mut *self.lock_workers());
        let panicked = workers
            .into_iter()
            .map(JoinHandle::join)
            .filter(Result::is_err)
            .count();
        if panicked > 0 {
            error!(panicked, "worker thread(s) panicked");
            return Err(RunnerError::Teardown(format!(
                "{panicked} worker thread(s) panicked"
            )));
        }
        Ok(())
    }

    fn close(&self) {
        self.shared.lock_queue().closed = true;
        self.shared.available.notify_all();
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // never joined: at least let the threads run out
        self.close();
    }
}

/// Decrements `live_workers` however the worker loop ends.
struct ExitGuard {
    shared: Arc<Shared>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.shared.lock_queue().live_workers -= 1;
        self.shared.exited.notify_all();
    }
}

fn worker_loop(index: usize, shared: Arc<Shared>) {
    let _exit = ExitGuard {
        shared: Arc::clone(&shared),
    };
    trace!(worker = index, "worker started");

    loop {
        let next = {
            let mut queue = shared.lock_queue();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break Some(job);
                }
                if queue.closed {
                    break None;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        // closed and drained
        let Some(QueuedJob { id, job }) = next else {
            break;
        };

        trace!(worker = index, task_id = %id, "task started");
        if job() == TaskStatus::Failed {
            debug!(worker = index, task_id = %id, "task failed");
        }
    }

    trace!(worker = index, "worker exiting");
}
