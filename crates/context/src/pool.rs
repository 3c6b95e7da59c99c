//! Bounded background pool with caller-runs backpressure.
//!
//! - `core_size` workers are started eagerly and stay alive
//! - submissions queue up to `queue_capacity`
//! - when the queue is full the pool grows to `max_size`; extra workers
//!   retire after `keep_alive` without work
//! - when both are saturated the task runs on the submitting thread
//!
//! Only [`ContextTask`]s are accepted, so every unit of work carries the
//! identity captured where it was submitted.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::carrier::{wrap, ContextTask};

/// Background pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub name: String,
    pub core_size: usize,
    pub max_size: usize,
    pub queue_capacity: usize,
    pub keep_alive: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "background".to_string(),
            core_size: 4,
            max_size: 16,
            queue_capacity: 100,
            keep_alive: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_sizes(mut self, core_size: usize, max_size: usize, queue_capacity: usize) -> Self {
        self.core_size = core_size;
        self.max_size = max_size;
        self.queue_capacity = queue_capacity;
        self
    }
}

/// Background pool error.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool {0} is shut down")]
    ShutDown(String),
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub workers: usize,
    pub idle: usize,
    pub queued: usize,
    pub completed: u64,
    pub caller_runs: u64,
    pub panicked: u64,
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<ContextTask>,
    workers: usize,
    idle: usize,
    spawned: usize,
    shutdown: bool,
}

#[derive(Debug)]
struct Inner {
    config: PoolConfig,
    state: Mutex<State>,
    available: Condvar,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    completed: AtomicU64,
    caller_runs: AtomicU64,
    panicked: AtomicU64,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_task(&self, task: ContextTask) {
        if catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
            self.panicked.fetch_add(1, Ordering::Relaxed);
            error!(pool = %self.config.name, "background task panicked");
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Bounded worker pool for detached work.
#[derive(Debug)]
pub struct BackgroundPool {
    inner: Arc<Inner>,
}

impl BackgroundPool {
    /// Start the pool and its core workers.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        if config.max_size == 0 || config.max_size < config.core_size {
            return Err(PoolError::InvalidConfig(format!(
                "max_size {} must be positive and >= core_size {}",
                config.max_size, config.core_size
            )));
        }

        let pool = Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
                available: Condvar::new(),
                handles: Mutex::new(Vec::new()),
                completed: AtomicU64::new(0),
                caller_runs: AtomicU64::new(0),
                panicked: AtomicU64::new(0),
            }),
        };

        for _ in 0..pool.inner.config.core_size {
            let mut state = pool.inner.state();
            pool.start_worker(&mut state, None)?;
        }

        info!(
            pool = %pool.inner.config.name,
            core_size = pool.inner.config.core_size,
            max_size = pool.inner.config.max_size,
            queue_capacity = pool.inner.config.queue_capacity,
            "background pool started"
        );
        Ok(pool)
    }

    /// Submit a wrapped task.
    ///
    /// Queues the task, hands it to a new extra worker, or runs it on the
    /// calling thread when the pool is saturated.
    pub fn execute(&self, task: ContextTask) -> Result<(), PoolError> {
        let mut state = self.inner.state();
        if state.shutdown {
            return Err(PoolError::ShutDown(self.inner.config.name.clone()));
        }

        // Idle workers take hand-offs even when the queue has no capacity.
        if state.queue.len() < state.idle || state.queue.len() < self.inner.config.queue_capacity {
            state.queue.push_back(task);
            self.inner.available.notify_one();
            return Ok(());
        }

        let task = if state.workers < self.inner.config.max_size {
            match self.start_worker(&mut state, Some(task)) {
                Ok(()) => return Ok(()),
                Err(StartError { task: Some(task), source }) => {
                    warn!(pool = %self.inner.config.name, error = %source, "could not grow pool");
                    task
                }
                Err(StartError { task: None, .. }) => return Ok(()),
            }
        } else {
            task
        };
        drop(state);

        debug!(pool = %self.inner.config.name, "pool saturated; running task on caller thread");
        self.inner.caller_runs.fetch_add(1, Ordering::Relaxed);
        self.inner.run_task(task);
        Ok(())
    }

    /// Wrap `f` in the caller's context and submit it.
    pub fn spawn<F>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute(wrap(f))
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state();
        PoolStats {
            workers: state.workers,
            idle: state.idle,
            queued: state.queue.len(),
            completed: self.inner.completed.load(Ordering::Relaxed),
            caller_runs: self.inner.caller_runs.load(Ordering::Relaxed),
            panicked: self.inner.panicked.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work, drain the queue and join every worker.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state();
            if !state.shutdown {
                state.shutdown = true;
                info!(pool = %self.inner.config.name, queued = state.queue.len(), "background pool shutting down");
            }
        }
        self.inner.available.notify_all();

        let handles = std::mem::take(
            &mut *self.inner.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn start_worker(
        &self,
        state: &mut MutexGuard<'_, State>,
        first: Option<ContextTask>,
    ) -> Result<(), StartError> {
        let inner = Arc::clone(&self.inner);
        let name = format!("{}-{}", self.inner.config.name, state.spawned);

        // Ownership of `first` moves into the thread; keep a way back out
        // if the spawn itself fails.
        let slot = Arc::new(Mutex::new(first));
        let thread_slot = Arc::clone(&slot);

        let spawned = thread::Builder::new().name(name).spawn(move || {
            let first = thread_slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            worker_loop(inner, first);
        });

        match spawned {
            Ok(handle) => {
                state.workers += 1;
                state.spawned += 1;
                let mut handles = self.inner.handles.lock().unwrap_or_else(PoisonError::into_inner);
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
                Ok(())
            }
            Err(source) => {
                let task = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                Err(StartError { task, source })
            }
        }
    }
}

impl Drop for BackgroundPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct StartError {
    task: Option<ContextTask>,
    source: std::io::Error,
}

impl From<StartError> for PoolError {
    fn from(value: StartError) -> Self {
        PoolError::Spawn(value.source)
    }
}

fn worker_loop(inner: Arc<Inner>, first: Option<ContextTask>) {
    let mut next = first;

    loop {
        if let Some(task) = next.take() {
            inner.run_task(task);
        }

        let mut state = inner.state();
        loop {
            if let Some(task) = state.queue.pop_front() {
                next = Some(task);
                break;
            }
            if state.shutdown {
                state.workers -= 1;
                return;
            }

            state.idle += 1;
            let (guard, timeout) = inner
                .available
                .wait_timeout(state, inner.config.keep_alive)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
            state.idle -= 1;

            if timeout.timed_out() && state.queue.is_empty() && state.workers > inner.config.core_size {
                state.workers -= 1;
                debug!(pool = %inner.config.name, "retiring idle extra worker");
                return;
            }
        }
    }
}
