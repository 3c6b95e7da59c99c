//! Fixed-delay periodic jobs on a small dedicated thread pool.
//!
//! A job goes back on the deadline queue only after its run returns
//! (`next = finish + delay`), so runs of one job never overlap and a slow run
//! pushes the next one back instead of piling up.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use workforce_context::{ContextSnapshot, PoolError};

/// Handle to a scheduled job, used to cancel it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduledJobId(u64);

impl core::fmt::Display for ScheduledJobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

struct Job {
    name: String,
    delay: Duration,
    snapshot: ContextSnapshot,
    run: Box<dyn Fn() + Send + Sync>,
}

#[derive(Default)]
struct State {
    /// Ordered by deadline; the id breaks ties.
    queue: BTreeMap<(Instant, ScheduledJobId), ()>,
    jobs: HashMap<ScheduledJobId, Arc<Job>>,
    next_id: u64,
    shutdown: bool,
}

struct Inner {
    name: String,
    state: Mutex<State>,
    wake: Condvar,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SchedulerPool {
    inner: Arc<Inner>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl SchedulerPool {
    pub fn new(name: impl Into<String>, threads: usize) -> Result<Self, PoolError> {
        let name = name.into();
        if threads == 0 {
            return Err(PoolError::InvalidConfig(format!("scheduler pool {name} needs at least one thread")));
        }

        let inner = Arc::new(Inner {
            name: name.clone(),
            state: Mutex::new(State::default()),
            wake: Condvar::new(),
        });

        let pool = Self {
            inner,
            handles: Mutex::new(Vec::with_capacity(threads)),
        };
        for i in 0..threads {
            let inner = Arc::clone(&pool.inner);
            let handle = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || scheduler_loop(inner))?;
            pool.handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }

        info!(scheduler = %name, threads, "scheduler pool started");
        Ok(pool)
    }

    /// Run `job` after `initial_delay`, then `delay` after each run finishes.
    ///
    /// The caller's execution context is captured now and installed for every
    /// run, then removed again, so nothing one run sets survives into the next.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        name: impl Into<String>,
        initial_delay: Duration,
        delay: Duration,
        job: F,
    ) -> Result<ScheduledJobId, PoolError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let name = name.into();
        let mut state = self.inner.state();
        if state.shutdown {
            return Err(PoolError::ShutDown(self.inner.name.clone()));
        }

        state.next_id += 1;
        let id = ScheduledJobId(state.next_id);
        state.jobs.insert(
            id,
            Arc::new(Job {
                name: name.clone(),
                delay,
                snapshot: ContextSnapshot::capture(),
                run: Box::new(job),
            }),
        );
        state.queue.insert((Instant::now() + initial_delay, id), ());
        drop(state);
        self.inner.wake.notify_one();

        debug!(scheduler = %self.inner.name, job = %name, job_id = %id, delay_ms = delay.as_millis() as u64, "job scheduled");
        Ok(id)
    }

    /// Stop scheduling a job. A run already in progress finishes normally.
    pub fn cancel(&self, id: ScheduledJobId) -> bool {
        let mut state = self.inner.state();
        let removed = state.jobs.remove(&id).is_some();
        state.queue.retain(|(_, queued), _| *queued != id);
        removed
    }

    /// Number of jobs currently scheduled.
    pub fn job_count(&self) -> usize {
        self.inner.state().jobs.len()
    }

    /// Stop all threads after their current run and wait for them.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.jobs.clear();
            state.queue.clear();
        }
        self.inner.wake.notify_all();

        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.join();
        }
        info!(scheduler = %self.inner.name, "scheduler pool stopped");
    }
}

impl Drop for SchedulerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn scheduler_loop(inner: Arc<Inner>) {
    loop {
        let (id, job) = {
            let mut state = inner.state();
            loop {
                if state.shutdown {
                    return;
                }
                let now = Instant::now();
                match state.queue.keys().next().copied() {
                    None => {
                        state = inner.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
                    }
                    Some((due, _)) if due > now => {
                        state = inner
                            .wake
                            .wait_timeout(state, due - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0;
                    }
                    Some(key) => {
                        state.queue.remove(&key);
                        if let Some(job) = state.jobs.get(&key.1) {
                            break (key.1, Arc::clone(job));
                        }
                    }
                }
            }
        };

        let outcome = job.snapshot.run(|| catch_unwind(AssertUnwindSafe(|| (job.run)())));
        if outcome.is_err() {
            error!(scheduler = %inner.name, job = %job.name, job_id = %id, "scheduled job panicked");
        }

        let mut state = inner.state();
        if !state.shutdown && state.jobs.contains_key(&id) {
            state.queue.insert((Instant::now() + job.delay, id), ());
            drop(state);
            inner.wake.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use workforce_context::{ContextHolder, ExecutionContext};

    use super::*;

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn runs_of_one_job_never_overlap() {
        let pool = SchedulerPool::new("overlap", 3).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let (a, m, r) = (active.clone(), max_active.clone(), runs.clone());
        pool.schedule_with_fixed_delay("slow", Duration::ZERO, Duration::from_millis(1), move || {
            let now = a.fetch_add(1, Ordering::SeqCst) + 1;
            m.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(15));
            a.fetch_sub(1, Ordering::SeqCst);
            r.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert!(wait_until(|| runs.load(Ordering::SeqCst) >= 4));
        pool.shutdown();
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_job_is_rescheduled() {
        let pool = SchedulerPool::new("panics", 1).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        pool.schedule_with_fixed_delay("boom", Duration::ZERO, Duration::from_millis(1), move || {
            r.fetch_add(1, Ordering::SeqCst);
            panic!("scheduled boom");
        })
        .unwrap();

        assert!(wait_until(|| runs.load(Ordering::SeqCst) >= 3));
        pool.shutdown();
    }

    #[test]
    fn identity_set_by_one_run_does_not_reach_another_job() {
        let pool = SchedulerPool::new("leak", 1).unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);

        pool.schedule_with_fixed_delay("setter", Duration::ZERO, Duration::from_millis(2), || {
            ContextHolder::set(ExecutionContext::new("carol", 3));
        })
        .unwrap();
        pool.schedule_with_fixed_delay("reader", Duration::from_millis(5), Duration::from_millis(2), move || {
            let _ = tx.lock().unwrap().send(ContextHolder::current());
        })
        .unwrap();

        for _ in 0..5 {
            let seen = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(seen, ExecutionContext::system());
        }
        pool.shutdown();
    }

    #[test]
    fn cancelled_job_stops_running() {
        let pool = SchedulerPool::new("cancel", 1).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let id = pool
            .schedule_with_fixed_delay("counter", Duration::ZERO, Duration::from_millis(1), move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(wait_until(|| runs.load(Ordering::SeqCst) >= 1));
        assert!(pool.cancel(id));
        assert!(!pool.cancel(id));
        thread::sleep(Duration::from_millis(20));
        let after_cancel = runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
        assert_eq!(pool.job_count(), 0);
    }

    #[test]
    fn scheduling_after_shutdown_fails() {
        let pool = SchedulerPool::new("closed", 1).unwrap();
        pool.shutdown();
        pool.shutdown();

        let err = pool
            .schedule_with_fixed_delay("late", Duration::ZERO, Duration::from_secs(1), || {})
            .unwrap_err();
        assert!(matches!(err, PoolError::ShutDown(_)));
    }

    #[test]
    fn zero_threads_is_rejected() {
        assert!(matches!(
            SchedulerPool::new("empty", 0),
            Err(PoolError::InvalidConfig(_))
        ));
    }
}
