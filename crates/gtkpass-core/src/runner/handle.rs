//! TaskHandle - 投入した仕事の結果を受け取るハンドル
//!
//! # 実装詳細
//! - Mutex + Condvar による状態セル（ポーリングしない）
//! - ワーカー側は `Completer` が結果を書き込み、`notify_all` で待機者を起こす
//! - `Completer` が結果を書かずに drop された場合は `Abandoned` で終端させる
//!   （どの経路でも終端状態にはちょうど一度だけ到達する）

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinError;

use super::state::TaskStatus;
use crate::error::TaskError;
use crate::ids::TaskId;
use crate::observability::TaskCounters;

enum Slot<T, E> {
    Pending,
    Running,
    Done(Result<T, TaskError<E>>),
    /// The outcome was moved out by `join`.
    Taken(TaskStatus),
}

impl<T, E> Slot<T, E> {
    fn status(&self) -> TaskStatus {
        match self {
            Slot::Pending => TaskStatus::Pending,
            Slot::Running => TaskStatus::Running,
            Slot::Done(Ok(_)) => TaskStatus::Completed,
            Slot::Done(Err(_)) => TaskStatus::Failed,
            Slot::Taken(status) => *status,
        }
    }

    fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

struct Cell<T, E> {
    slot: Mutex<Slot<T, E>>,
    done: Condvar,
}

impl<T, E> Cell<T, E> {
    fn lock(&self) -> MutexGuard<'_, Slot<T, E>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_forever(&self) -> MutexGuard<'_, Slot<T, E>> {
        self.done
            .wait_while(self.lock(), |slot| !slot.is_terminal())
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// `None` when the timeout elapsed first.
    fn wait_for(&self, timeout: Duration) -> Option<MutexGuard<'_, Slot<T, E>>> {
        let (guard, _) = self
            .done
            .wait_timeout_while(self.lock(), timeout, |slot| !slot.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        guard.is_terminal().then_some(guard)
    }
}

/// Create the two ends of one unit of work.
///
/// `counters` are the owning pool's; the completer keeps them up to date.
pub(crate) fn task_pair<T, E>(
    id: TaskId,
    counters: Arc<TaskCounters>,
) -> (TaskHandle<T, E>, Completer<T, E>) {
    let cell = Arc::new(Cell {
        slot: Mutex::new(Slot::Pending),
        done: Condvar::new(),
    });
    let handle = TaskHandle {
        id,
        cell: Arc::clone(&cell),
    };
    let completer = Completer {
        cell,
        counters,
        started: false,
        finished: false,
    };
    (handle, completer)
}

/// Eventual outcome of a submitted unit of work.
///
/// ```ignore
/// let handle = armed.submit(|| decrypt(&entry))?;
/// match handle.result(Some(Duration::from_secs(2))) {
///     Ok(secret) => show(secret),
///     Err(TaskError::Timeout(_)) => keep_spinner(),
///     Err(e) => report(e),
/// }
/// ```
pub struct TaskHandle<T, E> {
    id: TaskId,
    cell: Arc<Cell<T, E>>,
}

impl<T, E> TaskHandle<T, E> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.cell.lock().status()
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Block until the task is terminal. Returns `false` if `timeout` elapsed first.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            None => {
                drop(self.cell.wait_forever());
                true
            }
            Some(timeout) => self.cell.wait_for(timeout).is_some(),
        }
    }

    /// Block until the task is terminal and take its outcome.
    pub fn join(self) -> Result<T, TaskError<E>> {
        let mut slot = self.cell.wait_forever();
        let status = slot.status();
        match std::mem::replace(&mut *slot, Slot::Taken(status)) {
            Slot::Done(outcome) => outcome,
            _ => Err(TaskError::Abandoned),
        }
    }

    /// Async form of [`join`](Self::join) for callers running on tokio.
    ///
    /// The blocking wait is moved onto tokio's blocking pool.
    pub async fn join_async(self) -> Result<T, TaskError<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        tokio::task::spawn_blocking(move || self.join())
            .await
            .unwrap_or_else(|e| Err(join_error_outcome(e)))
    }
}

impl<T: Clone, E: Clone> TaskHandle<T, E> {
    /// Block until the task is terminal (or `timeout` elapses) and return a
    /// copy of its outcome. Can be called repeatedly; a timeout leaves the
    /// handle usable.
    pub fn result(&self, timeout: Option<Duration>) -> Result<T, TaskError<E>> {
        match timeout {
            None => clone_outcome(&self.cell.wait_forever()),
            Some(timeout) => match self.cell.wait_for(timeout) {
                Some(slot) => clone_outcome(&slot),
                None => Err(TaskError::Timeout(timeout)),
            },
        }
    }
}

impl<T, E> fmt::Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

/// A panicking join task is reported as such; a cancelled one (runtime
/// shutting down) never observed the outcome.
fn join_error_outcome<E>(e: JoinError) -> TaskError<E> {
    if e.is_panic() {
        TaskError::Panicked(format!("join task failed: {e}"))
    } else {
        TaskError::Abandoned
    }
}

fn clone_outcome<T: Clone, E: Clone>(slot: &Slot<T, E>) -> Result<T, TaskError<E>> {
    match slot {
        Slot::Done(outcome) => outcome.clone(),
        _ => Err(TaskError::Abandoned),
    }
}

/// Worker-side end of a handle.
pub(crate) struct Completer<T, E> {
    cell: Arc<Cell<T, E>>,
    counters: Arc<TaskCounters>,
    started: bool,
    finished: bool,
}

impl<T, E> Completer<T, E> {
    /// Run `work` and publish its outcome. A panic is caught and reported
    /// on the handle instead of unwinding into the worker.
    pub(crate) fn run<F>(mut self, work: F) -> TaskStatus
    where
        F: FnOnce() -> Result<T, E>,
    {
        {
            let mut slot = self.cell.lock();
            if matches!(*slot, Slot::Pending) {
                *slot = Slot::Running;
            }
        }
        self.started = true;
        self.counters.task_started();

        let outcome = match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(TaskError::Failed(err)),
            Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
        };
        self.finish(outcome)
    }

    fn finish(&mut self, outcome: Result<T, TaskError<E>>) -> TaskStatus {
        let status = if outcome.is_ok() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        // counts first: whoever sees the outcome must also see it counted
        self.counters
            .task_finished(status == TaskStatus::Completed, self.started);
        *self.cell.lock() = Slot::Done(outcome);
        self.finished = true;
        self.cell.done.notify_all();
        status
    }
}

impl<T, E> Drop for Completer<T, E> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(Err(TaskError::Abandoned));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
