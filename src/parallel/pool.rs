//! Fixed-size worker pool.
//!
//! ```text
//! Running ──shutdown()──▶ Draining ──(queue empty, threads joined)──▶ Stopped
//! ```
//!
//! `execute` only succeeds while Running. Draining lets already queued tasks
//! finish; nothing is cancelled. Every `shutdown` caller returns only once
//! the pool is Stopped, except a call made from one of the pool's own
//! workers, which cannot wait for itself.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

use crate::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Running,
    Draining,
    Stopped,
}

struct Control {
    state: PoolState,
    sender: Option<Sender<Job>>,
}

pub struct WorkerPool {
    name: String,
    size: usize,
    control: Mutex<Control>,
    stopped: Condvar,
    worker_ids: Vec<ThreadId>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `size` named worker threads (at least one).
    ///
    /// Fails if the OS refuses a thread; threads spawned so far are shut
    /// down again before returning.
    pub fn new(size: usize, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let size = size.max(1);
        let (tx, rx) = channel::unbounded::<Job>();

        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let rx = rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || worker_loop(rx));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    drop(tx);
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(Error::PoolSpawn(e));
                }
            }
        }
        tracing::debug!(pool = %name, workers = size, "worker pool started");

        Ok(Self {
            name,
            size,
            control: Mutex::new(Control { state: PoolState::Running, sender: Some(tx) }),
            stopped: Condvar::new(),
            worker_ids: workers.iter().map(|w| w.thread().id()).collect(),
            workers: Mutex::new(workers),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PoolState {
        self.control.lock().state
    }

    /// Queue a task. Panics inside the task surface as
    /// [`Error::TaskPanicked`] from the returned handle.
    pub fn execute<F, R>(&self, task: F) -> Result<TaskHandle<R>>
    where
        F: FnOnce() -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let (result_tx, result_rx) = channel::bounded(1);
        let job: Job = Box::new(move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(result) => result,
                Err(payload) => Err(Error::TaskPanicked(panic_message(payload))),
            };
            // The caller may have abandoned the handle.
            let _ = result_tx.send(result);
        });

        let control = self.control.lock();
        match (&control.state, &control.sender) {
            (PoolState::Running, Some(sender)) => {
                sender.send(job).map_err(|_| Error::PoolShutdown)?;
                Ok(TaskHandle { rx: result_rx })
            }
            _ => Err(Error::PoolShutdown),
        }
    }

    /// Stop accepting work, let queued tasks finish and join every worker.
    /// Idempotent. Concurrent callers block until the first one has
    /// joined the workers.
    pub fn shutdown(&self) {
        let current = thread::current().id();
        {
            let mut control = self.control.lock();
            match control.state {
                PoolState::Stopped => return,
                PoolState::Draining => {
                    if self.worker_ids.contains(&current) {
                        return;
                    }
                    while control.state != PoolState::Stopped {
                        self.stopped.wait(&mut control);
                    }
                    return;
                }
                PoolState::Running => {}
            }
            control.state = PoolState::Draining;
            // Closing the channel wakes idle workers once the queue is empty.
            control.sender = None;
        }

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::warn!(pool = %self.name, "worker thread exited abnormally");
            }
        }

        self.control.lock().state = PoolState::Stopped;
        self.stopped.notify_all();
        tracing::debug!(pool = %self.name, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("state", &self.state())
            .finish()
    }
}

fn worker_loop(rx: Receiver<Job>) {
    for job in rx.iter() {
        job();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_owned()
    }
}

// ============================================================================
// TaskHandle
// ============================================================================

/// Pending result of one pool task.
pub struct TaskHandle<R> {
    rx: Receiver<Result<R>>,
}

impl<R> TaskHandle<R> {
    /// Block until the task finishes.
    pub fn wait(self) -> Result<R> {
        self.rx.recv().unwrap_or(Err(Error::PoolShutdown))
    }

    /// Block for at most `timeout`.
    ///
    /// On timeout the task is abandoned, not cancelled: it still runs to
    /// completion and its side effects still land.
    pub fn wait_timeout(self, timeout: Duration) -> Result<R> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::TaskTimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(Error::PoolShutdown),
        }
    }

    pub fn is_finished(&self) -> bool {
        !self.rx.is_empty()
    }
}
