//! Bounded worker pool with caller-runs backpressure.
//!
//! `core_workers` threads live for the life of the pool. When the queue is
//! full, extra workers are started up to `max_workers`; they exit after
//! `keep_alive` without work. When the pool is saturated the submitting thread
//! runs the job itself, so submissions are never dropped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError, sync_channel};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, warn};

use crate::io::config::PoolConfig;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// First job for an extra worker, recoverable if the thread fails to start.
type JobSlot = Arc<Mutex<Option<Job>>>;

/// Longest a worker holds the queue lock while idle.
const IDLE_POLL: Duration = Duration::from_millis(200);

/// Where a submitted job ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// Handed to a newly started extra worker.
    Spawned,
    /// Run to completion on the submitting thread.
    CallerRan,
}

struct Shared {
    receiver: Mutex<Receiver<Job>>,
    live_workers: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

pub struct WorkerPool {
    sender: Option<SyncSender<Job>>,
    shared: Arc<Shared>,
    max_workers: usize,
    keep_alive: Duration,
}

impl WorkerPool {
    pub fn new(config: &PoolConfig) -> Result<Self> {
        let (sender, receiver) = sync_channel(config.queue_capacity.max(1));
        let pool = Self {
            sender: Some(sender),
            shared: Arc::new(Shared {
                receiver: Mutex::new(receiver),
                live_workers: AtomicUsize::new(0),
                handles: Mutex::new(Vec::new()),
            }),
            max_workers: config.max_workers.max(config.core_workers).max(1),
            keep_alive: Duration::from_secs(config.keep_alive_secs),
        };
        for _ in 0..config.core_workers.max(1) {
            pool.shared.live_workers.fetch_add(1, Ordering::SeqCst);
            pool.spawn_worker(true, None)?;
        }
        debug!(
            core_workers = config.core_workers,
            max_workers = pool.max_workers,
            queue_capacity = config.queue_capacity,
            "worker pool started"
        );
        Ok(pool)
    }

    pub fn live_workers(&self) -> usize {
        self.shared.live_workers.load(Ordering::SeqCst)
    }

    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Submission {
        let job: Job = Box::new(job);
        let Some(sender) = &self.sender else {
            run_job(job);
            return Submission::CallerRan;
        };
        let job = match sender.try_send(job) {
            Ok(()) => return Submission::Queued,
            Err(TrySendError::Full(job) | TrySendError::Disconnected(job)) => job,
        };

        if self.reserve_extra_worker() {
            let slot = Arc::new(Mutex::new(Some(job)));
            match self.spawn_worker(false, Some(Arc::clone(&slot))) {
                Ok(()) => return Submission::Spawned,
                Err(err) => error!(err = %format!("{err:#}"), "failed to start extra worker"),
            }
            let Some(job) = take_job(&slot) else {
                return Submission::Spawned;
            };
            warn!("running job on caller thread after worker start failure");
            run_job(job);
            return Submission::CallerRan;
        }

        warn!("worker pool saturated, running job on caller thread");
        run_job(job);
        Submission::CallerRan
    }

    /// Stop accepting work, let queued jobs finish, and join every worker.
    pub fn shutdown(&mut self) {
        self.sender = None;
        let handles = std::mem::take(
            &mut *self
                .shared
                .handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }

    fn reserve_extra_worker(&self) -> bool {
        self.shared
            .live_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < self.max_workers).then_some(live + 1)
            })
            .is_ok()
    }

    /// Caller must already have counted the worker in `live_workers`.
    fn spawn_worker(&self, core: bool, first: Option<JobSlot>) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let keep_alive = self.keep_alive;
        let spawned = thread::Builder::new()
            .name(if core { "agent-worker" } else { "agent-worker-extra" }.to_string())
            .spawn(move || worker_loop(&shared, core, keep_alive, first));
        match spawned {
            Ok(handle) => {
                self.shared
                    .handles
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.live_workers.fetch_sub(1, Ordering::SeqCst);
                Err(e).context("spawn worker thread")
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared, core: bool, keep_alive: Duration, first: Option<JobSlot>) {
    if let Some(job) = first.as_ref().and_then(take_job) {
        run_job(job);
    }
    let mut idle_since = Instant::now();
    loop {
        let wait = if core {
            IDLE_POLL
        } else {
            let remaining = keep_alive.saturating_sub(idle_since.elapsed());
            if remaining.is_zero() {
                debug!("extra worker idle past keep-alive, exiting");
                break;
            }
            remaining.min(IDLE_POLL)
        };
        let received = shared
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv_timeout(wait);
        match received {
            Ok(job) => {
                run_job(job);
                idle_since = Instant::now();
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    shared.live_workers.fetch_sub(1, Ordering::SeqCst);
}

fn take_job(slot: &JobSlot) -> Option<Job> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

fn run_job(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("job panicked");
    }
}
