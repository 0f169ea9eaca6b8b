//! Background worker pool
//!
//! A cached pool: threads are spawned on demand when no worker is free, reused
//! while work keeps arriving, and retired after an idle timeout. Threads are
//! never joined, so they do not hold up process exit, and are named
//! `<prefix>-<n>` with `n` counting from 1.
//!
//! Free workers are tracked as a signed balance: each worker waiting for work
//! adds one, each submission takes one. A submission that finds no free worker
//! spawns one; when the thread bound refuses, the balance goes negative and the
//! next worker to finish a job picks up the debt. A worker retires only if it
//! can take a unit of the balance, so a queued job never loses its worker.
//!
//! No ordering is guaranteed between submissions.

use crate::diagnostics;
use crate::failure::panic_message;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default worker thread name prefix
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "probar-async-pool-thread";

/// Default idle time before a worker retires (60 seconds)
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;

/// Work submitted to the pool
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Thread name prefix
    pub thread_name_prefix: String,
    /// Upper bound on live workers (0 = unbounded)
    pub max_threads: usize,
    /// Idle time before a worker retires
    pub idle_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            max_threads: 0,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
        }
    }
}

impl PoolConfig {
    /// Set the thread name prefix
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the maximum number of workers
    #[must_use]
    pub const fn with_max_threads(mut self, max: usize) -> Self {
        self.max_threads = max;
        self
    }

    /// Set the idle timeout
    #[must_use]
    pub const fn with_idle_timeout(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = ms;
        self
    }

    /// Idle timeout as Duration
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

struct PoolInner {
    config: PoolConfig,
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    live: AtomicUsize,
    free: AtomicIsize,
    spawned: AtomicUsize,
}

impl PoolInner {
    /// Take one free worker, if any
    fn reserve_free(&self) -> bool {
        self.free
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |free| {
                (free > 0).then_some(free - 1)
            })
            .is_ok()
    }

    /// Claim a live-thread slot under the bound
    fn claim_slot(&self) -> bool {
        let max = self.config.max_threads;
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (max == 0 || live < max).then_some(live + 1)
            })
            .is_ok()
    }
}

/// Handle to a cached pool of daemon-like worker threads
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("prefix", &self.inner.config.thread_name_prefix)
            .field("live_threads", &self.live_threads())
            .field("idle_threads", &self.idle_threads())
            .field("queued", &self.queued())
            .finish()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl WorkerPool {
    /// Create a pool; no thread is started until work arrives
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            inner: Arc::new(PoolInner {
                config,
                sender,
                receiver,
                live: AtomicUsize::new(0),
                free: AtomicIsize::new(0),
                spawned: AtomicUsize::new(0),
            }),
        }
    }

    /// Pool settings
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Workers currently alive
    #[must_use]
    pub fn live_threads(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Workers waiting for work and not yet promised to a queued job
    #[must_use]
    pub fn idle_threads(&self) -> usize {
        usize::try_from(self.inner.free.load(Ordering::SeqCst)).unwrap_or(0)
    }

    /// Jobs not yet picked up
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.receiver.len()
    }

    /// Queue a job, starting a worker if none is free
    pub fn execute(&self, job: Job) {
        if self.inner.sender.send(job).is_err() {
            return;
        }
        if self.inner.free.fetch_sub(1, Ordering::SeqCst) > 0 {
            return;
        }
        if self.spawn_worker() {
            // the new worker is promised to this job
            self.inner.free.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn spawn_worker(&self) -> bool {
        if !self.inner.claim_slot() {
            return false;
        }
        let index = self.inner.spawned.fetch_add(1, Ordering::SeqCst) + 1;
        let name = format!("{}-{index}", self.inner.config.thread_name_prefix);
        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&inner));
        match spawned {
            Ok(_) => true,
            Err(err) => {
                self.inner.live.fetch_sub(1, Ordering::SeqCst);
                tracing::error!(target: diagnostics::TARGET, thread = %name, "failed to spawn pool worker: {err}");
                false
            }
        }
    }
}

/// Decide whether a worker whose wait timed out may exit
///
/// The worker gives up its live slot first, so a submission racing with the
/// retirement can spawn a replacement. If a job is still owed a worker after
/// that, the worker claims a slot back and settles the debt itself.
fn try_retire(inner: &PoolInner) -> bool {
    if !inner.reserve_free() {
        return false;
    }
    inner.live.fetch_sub(1, Ordering::SeqCst);
    if inner.free.load(Ordering::SeqCst) < 0 && inner.claim_slot() {
        inner.free.fetch_add(1, Ordering::SeqCst);
        return false;
    }
    true
}

fn worker_loop(inner: &PoolInner) {
    let idle_timeout = inner.config.idle_timeout();
    loop {
        match inner.receiver.recv_timeout(idle_timeout) {
            Ok(job) => {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                    tracing::error!(
                        target: diagnostics::TARGET,
                        "pool job panicked outside a task wrapper: {}",
                        panic_message(payload.as_ref())
                    );
                }
                inner.free.fetch_add(1, Ordering::SeqCst);
            }
            Err(RecvTimeoutError::Timeout) => {
                if try_retire(inner) {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    inner.live.fetch_sub(1, Ordering::SeqCst);
}
