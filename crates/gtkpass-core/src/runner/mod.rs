//! TaskRunner - UI スレッドから重い処理を逃がすための bounded worker pool
//!
//! # ライフサイクル
//! - 構築直後は unarmed（プールなし）
//! - `enter()` で arm（`max_workers` 本のワーカーを起動）し、`ArmedRunner` を返す
//! - `ArmedRunner` の drop（または `exit()`）で disarm（drain してからプールを破棄）
//! - disarm 後に再度 `enter()` できる
//!
//! # ロック
//! - `transition`: arm/disarm の遷移を直列化する。drain の間も保持する。
//!   teardown が時間切れになったプール（まだ動いているワーカーがいる）も
//!   ここに残し、それが空になるまで次の arm は `Busy` で断る
//! - `pool`: プールの差し替えの間だけ保持する。`submit` はこちらしか触らないので、
//!   drain 中でも `submit` はブロックされない（閉じたプールは `NotArmed` を返す）

mod handle;
mod pool;
mod state;

pub use self::handle::TaskHandle;
pub use self::state::TaskStatus;

use std::convert::Infallible;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info};

use self::pool::WorkerPool;
use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::ids::TaskId;
use crate::observability::RunnerCounts;

/// Runs blocking work on a fixed number of worker threads.
///
/// ```ignore
/// let runner = TaskRunner::new(2)?;
/// {
///     let armed = runner.enter()?;
///     let handles: Vec<_> = (0..5)
///         .map(|n| armed.submit_infallible(move || n * 2))
///         .collect::<Result<_, _>>()?;
///     // ...
/// } // drained and released here, on every exit path
/// ```
pub struct TaskRunner {
    config: RunnerConfig,
    pool: Mutex<Option<Arc<WorkerPool>>>,
    /// Serializes arm/disarm. Holds a pool whose teardown timed out.
    transition: Mutex<Option<Arc<WorkerPool>>>,
}

impl TaskRunner {
    /// Unarmed runner with `capacity` workers and default settings otherwise.
    pub fn new(capacity: usize) -> Result<Self, RunnerError> {
        Self::from_config(RunnerConfig::default().with_max_workers(capacity))
    }

    pub fn from_config(config: RunnerConfig) -> Result<Self, RunnerError> {
        config.validate()?;
        Ok(Self {
            config,
            pool: Mutex::new(None),
            transition: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.max_workers
    }

    pub fn is_armed(&self) -> bool {
        self.lock_pool().is_some()
    }

    /// Arm the runner and return a guard that disarms it when dropped.
    ///
    /// Entering while already armed does not allocate a second pool.
    /// Whichever guard is released first disarms the runner.
    ///
    /// After a timed-out teardown this fails with `Busy` until the
    /// detached workers have finished their work.
    pub fn enter(&self) -> Result<ArmedRunner<'_>, RunnerError> {
        self.arm()?;
        Ok(ArmedRunner {
            runner: self,
            exited: false,
        })
    }

    /// Enqueue `work` for the next free worker and return its handle
    /// without waiting for it to start.
    ///
    /// Fails with `NotArmed` outside an armed scope; nothing is queued then.
    pub fn submit<F, T, E>(&self, work: F) -> Result<TaskHandle<T, E>, RunnerError>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let pool = self.active_pool()?;
        let id = TaskId::generate();
        let (handle, completer) = handle::task_pair(id, pool.counters());

        pool.execute(id, Box::new(move || completer.run(work)))?;
        debug!(task_id = %id, "task submitted");
        Ok(handle)
    }

    /// `submit` for a function plus its arguments, e.g. `(path, passphrase)`.
    pub fn submit_with<F, A, T, E>(&self, work: F, args: A) -> Result<TaskHandle<T, E>, RunnerError>
    where
        F: FnOnce(A) -> Result<T, E> + Send + 'static,
        A: Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.submit(move || work(args))
    }

    /// `submit` for work that cannot fail (it may still panic).
    pub fn submit_infallible<F, T>(&self, work: F) -> Result<TaskHandle<T, Infallible>, RunnerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit(move || Ok(work()))
    }

    /// Snapshot of the current pool. All zeros while unarmed.
    pub fn counts(&self) -> RunnerCounts {
        match self.lock_pool().as_ref() {
            Some(pool) => pool.counts(),
            None => RunnerCounts::default(),
        }
    }

    fn arm(&self) -> Result<(), RunnerError> {
        let mut retired = self.lock_transition();
        if self.lock_pool().is_some() {
            return Ok(());
        }
        if let Some(old) = retired.as_ref() {
            let busy = old.live_workers();
            if busy > 0 {
                return Err(RunnerError::Busy { busy });
            }
            *retired = None;
        }

        let pool = WorkerPool::spawn(self.config.max_workers, &self.config.thread_name_prefix)?;
        *self.lock_pool() = Some(Arc::new(pool));
        info!(capacity = self.config.max_workers, "task runner armed");
        Ok(())
    }

    /// Drain and release the pool. No-op when unarmed.
    ///
    /// The pool is unpublished first, so new submissions fail with
    /// `NotArmed` while the drain is still running.
    fn disarm(&self) -> Result<(), RunnerError> {
        let mut retired = self.lock_transition();
        let Some(pool) = self.lock_pool().take() else {
            return Ok(());
        };

        let result = pool.shutdown(self.config.join_timeout());
        match &result {
            Ok(()) => info!(capacity = pool.capacity(), "task runner disarmed"),
            Err(e) => {
                error!(error = %e, "task runner teardown failed; pool discarded");
                if pool.live_workers() > 0 {
                    *retired = Some(pool);
                }
            }
        }
        result
    }

    fn active_pool(&self) -> Result<Arc<WorkerPool>, RunnerError> {
        self.lock_pool().clone().ok_or(RunnerError::NotArmed)
    }

    fn lock_pool(&self) -> MutexGuard<'_, Option<Arc<WorkerPool>>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_transition(&self) -> MutexGuard<'_, Option<Arc<WorkerPool>>> {
        self.transition.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("capacity", &self.capacity())
            .field("armed", &self.is_armed())
            .finish()
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        if let Err(e) = self.disarm() {
            error!(error = %e, "disarm on drop failed");
        }
    }
}

/// An armed [`TaskRunner`]. Disarms (drain + release) exactly once when
/// dropped or when [`exit`](Self::exit) is called.
pub struct ArmedRunner<'a> {
    runner: &'a TaskRunner,
    exited: bool,
}

impl ArmedRunner<'_> {
    /// Disarm now and report teardown failures, which `Drop` can only log.
    pub fn exit(mut self) -> Result<(), RunnerError> {
        self.exited = true;
        self.runner.disarm()
    }
}

impl Deref for ArmedRunner<'_> {
    type Target = TaskRunner;

    fn deref(&self) -> &TaskRunner {
        self.runner
    }
}

impl Drop for ArmedRunner<'_> {
    fn drop(&mut self) {
        if self.exited {
            return;
        }
        self.exited = true;
        if let Err(e) = self.runner.disarm() {
            error!(error = %e, "disarm on scope exit failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    #[test]
    fn zero_capacity_is_rejected() {
        let err = TaskRunner::new(0).unwrap_err();
        assert!(matches!(err, RunnerError::InvalidConfiguration(_)));
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(4)]
    #[case(16)]
    fn arm_then_disarm_without_work(#[case] capacity: usize) {
        let runner = TaskRunner::new(capacity).unwrap();
        assert!(!runner.is_armed());

        let armed = runner.enter().unwrap();
        assert!(armed.is_armed());
        assert_eq!(armed.counts().workers, capacity);
        armed.exit().unwrap();

        assert!(!runner.is_armed());
    }

    #[test]
    fn submit_before_enter_is_not_armed() {
        let runner = TaskRunner::new(2).unwrap();
        let err = runner.submit_infallible(|| 1).unwrap_err();
        assert!(matches!(err, RunnerError::NotArmed));
    }

    #[test]
    fn submit_after_exit_is_not_armed() {
        let runner = TaskRunner::new(2).unwrap();
        runner.enter().unwrap().exit().unwrap();
        assert!(matches!(
            runner.submit_infallible(|| 1),
            Err(RunnerError::NotArmed)
        ));
    }

    #[test]
    fn repeated_arm_does_not_reallocate() {
        let runner = TaskRunner::new(2).unwrap();
        runner.arm().unwrap();
        let first = runner.active_pool().unwrap();
        runner.arm().unwrap();
        let second = runner.active_pool().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        drop((first, second));

        runner.disarm().unwrap();
        runner.disarm().unwrap();
        assert!(!runner.is_armed());
    }

    #[test]
    fn concurrent_arm_allocates_one_pool() {
        let runner = Arc::new(TaskRunner::new(3).unwrap());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let runner = Arc::clone(&runner);
                thread::spawn(move || {
                    runner.arm().unwrap();
                    runner.active_pool().unwrap()
                })
            })
            .collect();

        let pools: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert!(pools.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        drop(pools);
        runner.disarm().unwrap();
    }

    #[test]
    fn submit_with_passes_arguments() {
        let runner = TaskRunner::new(2).unwrap();
        let armed = runner.enter().unwrap();
        let handle = armed
            .submit_with(|(x, y): (i32, i32)| Ok::<_, Infallible>(x + y), (2, 3))
            .unwrap();
        assert_eq!(handle.result(WAIT), Ok(5));
    }

    #[test]
    fn guard_disarms_on_early_return() {
        fn lookup(runner: &TaskRunner) -> Result<u32, String> {
            let armed = runner.enter().map_err(|e| e.to_string())?;
            let handle = armed
                .submit(|| Err::<u32, _>("entry not found".to_string()))
                .map_err(|e| e.to_string())?;
            let value = handle.join().map_err(|e| e.to_string())?;
            Ok(value)
        }

        let runner = TaskRunner::new(1).unwrap();
        let err = lookup(&runner).unwrap_err();
        assert!(err.contains("entry not found"));
        assert!(!runner.is_armed());
    }

    #[test]
    fn guard_disarms_when_scope_panics() {
        let runner = TaskRunner::new(1).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let armed = runner.enter().unwrap();
            let _handle = armed.submit_infallible(|| 1).unwrap();
            panic!("ui callback blew up");
        }));
        assert!(result.is_err());
        assert!(!runner.is_armed());
    }

    #[test]
    fn exit_waits_for_in_flight_work() {
        let runner = TaskRunner::new(1).unwrap();
        let armed = runner.enter().unwrap();
        let handle = armed
            .submit_infallible(|| {
                thread::sleep(Duration::from_millis(50));
                "decrypted"
            })
            .unwrap();
        armed.exit().unwrap();

        assert!(handle.is_finished());
        assert_eq!(handle.result(None), Ok("decrypted"));
    }

    #[test]
    fn panicking_work_does_not_take_down_the_pool() {
        let runner = TaskRunner::new(1).unwrap();
        let armed = runner.enter().unwrap();

        let bad = armed.submit_infallible(|| -> u32 { panic!("boom") }).unwrap();
        let good = armed.submit_infallible(|| 10u32).unwrap();

        assert_eq!(bad.result(WAIT), Err(TaskError::Panicked("boom".to_string())));
        assert_eq!(good.result(WAIT), Ok(10));

        let counts = armed.counts();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
    }

    #[test]
    fn join_timeout_surfaces_teardown_error_and_leaves_runner_unarmed() {
        let config = RunnerConfig::default()
            .with_max_workers(1)
            .with_join_timeout(Duration::from_millis(20));
        let runner = TaskRunner::from_config(config).unwrap();

        let armed = runner.enter().unwrap();
        let _slow = armed
            .submit_infallible(|| thread::sleep(Duration::from_millis(300)))
            .unwrap();
        let err = armed.exit().unwrap_err();

        assert!(matches!(err, RunnerError::Teardown(_)));
        assert!(!runner.is_armed());

        // re-arming gets a fresh pool once the straggler is gone
        let armed = enter_when_idle(&runner);
        assert_eq!(armed.submit_infallible(|| 1).unwrap().result(WAIT), Ok(1));
    }

    fn enter_when_idle(runner: &TaskRunner) -> ArmedRunner<'_> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match runner.enter() {
                Ok(armed) => return armed,
                Err(RunnerError::Busy { .. }) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("enter failed: {e}"),
            }
        }
    }

    #[test]
    fn counts_include_a_task_as_soon_as_its_result_is_seen() {
        let runner = TaskRunner::new(1).unwrap();
        let armed = runner.enter().unwrap();
        for i in 0..500 {
            let handle = armed.submit_infallible(move || i).unwrap();
            assert_eq!(handle.result(WAIT), Ok(i));
            let counts = armed.counts();
            assert_eq!(counts.completed, i + 1);
            assert_eq!(counts.running, 0);
        }
    }

    #[test]
    fn timed_out_teardown_never_exceeds_capacity() {
        let config = RunnerConfig::default()
            .with_max_workers(1)
            .with_join_timeout(Duration::from_millis(20));
        let runner = TaskRunner::from_config(config).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let sleeper = |active: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>| {
            let (active, peak) = (Arc::clone(active), Arc::clone(peak));
            move || {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(150));
                active.fetch_sub(1, Ordering::SeqCst);
            }
        };

        let armed = runner.enter().unwrap();
        let handles: Vec<_> = (0..3)
            .map(|_| armed.submit_infallible(sleeper(&active, &peak)).unwrap())
            .collect();
        assert!(matches!(armed.exit(), Err(RunnerError::Teardown(_))));

        // the two queued behind the straggler never start
        for handle in &handles[1..] {
            assert_eq!(handle.result(WAIT), Err(TaskError::Abandoned));
        }
        assert!(matches!(runner.enter(), Err(RunnerError::Busy { busy: 1 })));

        let mut handles = handles.into_iter();
        assert_eq!(handles.next().map(|h| h.join()), Some(Ok(())));

        let armed = enter_when_idle(&runner);
        let more: Vec<_> = (0..2)
            .map(|_| armed.submit_infallible(sleeper(&active, &peak)).unwrap())
            .collect();
        for handle in more {
            handle.join().unwrap();
        }
        armed.exit().unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn counts_are_zero_while_unarmed() {
        let runner = TaskRunner::new(3).unwrap();
        assert_eq!(runner.counts(), RunnerCounts::default());
    }
}
