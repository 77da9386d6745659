//! Bounded worker pool for maintenance tasks.
//!
//! Export and import can run in the background: they are submitted to a
//! fixed set of worker threads through a bounded FIFO queue, and the caller
//! gets a [`TaskHandle`] that reports the task's outcome. A task that panics
//! is reported as a failure; the worker survives.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send>;

struct PoolInner {
    queue: Mutex<VecDeque<Job>>,
    work_ready: Condvar,
    shutdown: AtomicBool,
    max_queue: usize,
    completed: AtomicU64,
}

/// Fixed-size worker pool with a bounded queue.
pub struct TaskPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("workers", &self.workers.lock().len())
            .field("queued", &self.queued())
            .field("completed", &self.completed())
            .finish()
    }
}

/// Completion handle of a submitted task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task finishes and returns its result.
    ///
    /// A panicking task, or a pool shut down before the task ran, yields a
    /// server error.
    pub fn wait(self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| Error::server("task dropped before completion"))?
    }
}

impl TaskPool {
    /// Spawns `workers` threads serving a queue of at most `max_queue` tasks.
    pub fn new(workers: usize, max_queue: usize) -> Result<Self> {
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            max_queue: max_queue.max(1),
            completed: AtomicU64::new(0),
        });

        let mut handles = Vec::with_capacity(workers.max(1));
        for i in 0..workers.max(1) {
            let inner = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("unibase-task-{i}"))
                .spawn(move || worker_loop(&inner))?;
            handles.push(handle);
        }

        Ok(Self {
            inner,
            workers: Mutex::new(handles),
        })
    }

    /// Queues `work`. Fails fast when the queue is full or the pool is shut
    /// down.
    pub fn submit<T, F>(&self, work: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(Error::server("task pool is shut down"));
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let job: Job = Box::new(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(result) => result,
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "(non-string panic)".to_string());
                    error!(panic = %message, "maintenance task panicked");
                    Err(Error::server(format!("task panicked: {message}")))
                }
            };
            let _ = tx.send(outcome);
        });

        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.max_queue {
                return Err(Error::server("task queue is full"));
            }
            queue.push_back(job);
        }
        self.inner.work_ready.notify_one();
        Ok(TaskHandle { rx })
    }

    /// Tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Tasks finished since creation.
    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    /// Runs the remaining queue, then joins all workers.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    break job;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    debug!("task worker exiting");
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };
        job();
        inner.completed.fetch_add(1, Ordering::Relaxed);
    }
}
