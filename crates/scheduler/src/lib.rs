//! Bounded task scheduler for transaction participants.
//!
//! A fixed pool of worker threads drains a FIFO queue whose depth is capped
//! at the pool size. Sizing the pool to the number of participants means
//! every participant gets its own thread as soon as it is submitted; no
//! participant ever waits for another to finish before it can start.

#![warn(missing_docs)]
#![warn(clippy::all)]

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::error;

/// Errors returned by [`BoundedScheduler`]
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The queue already holds `capacity` pending tasks
    #[error("scheduler queue is full (capacity {capacity})")]
    Full {
        /// Configured capacity
        capacity: usize,
    },

    /// The scheduler has been shut down and accepts no more work
    #[error("scheduler has been shut down")]
    ShutDown,

    /// A worker thread could not be spawned
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Scheduler metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Number of tasks waiting in the queue.
    pub queue_depth: usize,
    /// Number of tasks currently being executed by workers.
    pub active_tasks: usize,
    /// Total number of tasks completed since scheduler creation.
    pub tasks_completed: u64,
    /// Number of worker threads.
    pub worker_count: usize,
}

type Task = Box<dyn FnOnce() + Send>;

struct SchedulerInner {
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    active_tasks: AtomicUsize,
    tasks_completed: AtomicU64,
}

/// A fixed-capacity pool of worker threads.
///
/// Tasks run in submission order, each on its own worker once one is free.
/// Dropping the scheduler shuts it down and joins every worker.
pub struct BoundedScheduler {
    inner: Arc<SchedulerInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    capacity: usize,
}

impl BoundedScheduler {
    /// Create a scheduler with `capacity` worker threads and a queue bounded
    /// to `capacity` pending tasks.
    ///
    /// Workers are named `{name_prefix}-0`, `{name_prefix}-1`, etc. If any
    /// worker fails to spawn, the ones already running are joined and the
    /// spawn error is returned.
    pub fn new(capacity: usize, name_prefix: &str) -> Result<Self, SchedulerError> {
        let inner = Arc::new(SchedulerInner {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            tasks_completed: AtomicU64::new(0),
        });

        let scheduler = Self {
            inner,
            workers: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        };

        for i in 0..capacity {
            let inner = Arc::clone(&scheduler.inner);
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", name_prefix, i))
                .spawn(move || worker_loop(&inner))?;
            scheduler.workers.lock().push(handle);
        }

        Ok(scheduler)
    }

    /// Maximum number of concurrently running (and of queued) tasks.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Submit a task for execution.
    ///
    /// Returns `Err(SchedulerError::Full)` if the queue is at capacity and
    /// `Err(SchedulerError::ShutDown)` once the scheduler has been shut down.
    pub fn submit(&self, work: impl FnOnce() + Send + 'static) -> Result<(), SchedulerError> {
        // Workers have been joined after shutdown; the task would never run
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(SchedulerError::ShutDown);
        }

        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.capacity {
                return Err(SchedulerError::Full {
                    capacity: self.capacity,
                });
            }
            queue.push_back(Box::new(work));
            self.inner.queue_depth.fetch_add(1, Ordering::Release);
        }

        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Block until all queued and in-flight tasks have completed.
    ///
    /// Workers remain running after drain completes; this does NOT signal shutdown.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.queue_depth.load(Ordering::Acquire) > 0
            || self.inner.active_tasks.load(Ordering::Acquire) > 0
        {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Shut down the scheduler: signal workers to exit and join all threads.
    ///
    /// Workers finish remaining queued tasks before exiting. Calling this
    /// more than once is a no-op.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);

        // Holding the queue lock while notifying prevents a lost wakeup for a
        // worker sitting between its shutdown check and its condvar wait.
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// True once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Return a snapshot of scheduler metrics.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queue_depth: self.inner.queue_depth.load(Ordering::Relaxed),
            active_tasks: self.inner.active_tasks.load(Ordering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(Ordering::Relaxed),
            worker_count: self.workers.lock().len(),
        }
    }
}

impl Drop for BoundedScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for BoundedScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedScheduler")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Decrements `active_tasks` and notifies drain waiters on drop, so the
/// bookkeeping stays correct when a task panics.
struct ActiveTaskGuard<'a> {
    inner: &'a SchedulerInner,
}

impl<'a> Drop for ActiveTaskGuard<'a> {
    fn drop(&mut self) {
        let prev_active = self.inner.active_tasks.fetch_sub(1, Ordering::Release);
        self.inner.tasks_completed.fetch_add(1, Ordering::Relaxed);

        if prev_active == 1 && self.inner.queue_depth.load(Ordering::Acquire) == 0 {
            let _queue = self.inner.queue.lock();
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &SchedulerInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    inner.queue_depth.fetch_sub(1, Ordering::Release);
                    inner.active_tasks.fetch_add(1, Ordering::Release);
                    break task;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTaskGuard { inner };

        // Execute outside the lock. A panicking task must not take the worker down.
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            error!(
                worker = std::thread::current().name().unwrap_or("unnamed"),
                panic = %panic_message(e.as_ref()),
                "scheduler task panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "(non-string panic)".to_string()
    }
}
