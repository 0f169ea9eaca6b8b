//! Failure Registry
//!
//! Process-wide staging area for failures raised by work nobody has joined
//! yet. Producers are pool threads, the UI loop and (when attached) the panic
//! hook; consumers are any calling thread.
//!
//! Entries leave the registry exactly one way: consumed out of band
//! ([`FailureRegistry::consume_one`]), evicted because the owning handle was
//! joined ([`FailureRegistry::evict`]), or cleared.

use crate::diagnostics;
use crate::failure::Failure;
use crate::result::{AsyncError, AsyncResult};
use crate::task;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Identifier of one registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl EntryId {
    /// Raw id value
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Concurrent FIFO of failures not yet observed by a caller
pub struct FailureRegistry {
    entries: Mutex<VecDeque<(EntryId, Failure)>>,
    next_id: AtomicU64,
    auto_check: AtomicBool,
    print_on_register: AtomicBool,
}

impl fmt::Debug for FailureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureRegistry")
            .field("pending", &self.len())
            .field("auto_check", &self.auto_check())
            .field("print_on_register", &self.print_on_register())
            .finish()
    }
}

impl Default for FailureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: OnceLock<Arc<FailureRegistry>> = OnceLock::new();

impl FailureRegistry {
    /// Create an empty registry with auto-check and printing enabled
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            auto_check: AtomicBool::new(true),
            print_on_register: AtomicBool::new(true),
        }
    }

    /// The process-wide registry
    #[must_use]
    pub fn global() -> Arc<Self> {
        GLOBAL.get_or_init(|| Arc::new(Self::new())).clone()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<(EntryId, Failure)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stage a failure at the back of the queue
    pub fn register(&self, failure: Failure) -> EntryId {
        if self.print_on_register() {
            tracing::error!(
                target: diagnostics::TARGET,
                "{}",
                diagnostics::failure_report(&failure)
            );
        }
        let id = EntryId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push_back((id, failure));
        id
    }

    /// Remove and return the oldest failure, marked as delayed
    pub fn consume_one(&self) -> Option<Failure> {
        self.lock()
            .pop_front()
            .map(|(_, failure)| failure.into_delayed())
    }

    /// Remove a specific entry; false if it was already gone
    pub fn evict(&self, id: EntryId) -> bool {
        let mut entries = self.lock();
        match entries.iter().position(|(entry, _)| *entry == id) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drop every staged failure
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of staged failures
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if nothing is staged
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of staged failures, oldest first
    #[must_use]
    pub fn pending(&self) -> Vec<Failure> {
        self.lock().iter().map(|(_, f)| f.clone()).collect()
    }

    /// Whether each dispatch first surfaces a stale failure
    #[must_use]
    pub fn auto_check(&self) -> bool {
        self.auto_check.load(Ordering::SeqCst)
    }

    /// Enable or disable auto-check
    pub fn set_auto_check(&self, enabled: bool) {
        self.auto_check.store(enabled, Ordering::SeqCst);
    }

    /// Whether registration also emits a diagnostic report
    #[must_use]
    pub fn print_on_register(&self) -> bool {
        self.print_on_register.load(Ordering::SeqCst)
    }

    /// Enable or disable the registration report
    pub fn set_print_on_register(&self, enabled: bool) {
        self.print_on_register.store(enabled, Ordering::SeqCst);
    }

    /// Fail with the oldest staged failure when auto-check is on
    pub(crate) fn surface_stale(&self) -> AsyncResult<()> {
        if !self.auto_check() {
            return Ok(());
        }
        match self.consume_one() {
            Some(failure) => Err(AsyncError::Execution(failure)),
            None => Ok(()),
        }
    }

    /// Funnel panics from every thread into this registry
    ///
    /// Installs a process-wide panic hook that chains to the previously
    /// installed one. Panics inside work dispatched by this crate are skipped
    /// since the task wrapper already routes them. The hook stays installed
    /// until the returned guard is detached or dropped, after which it only
    /// forwards to the previous hook.
    ///
    /// `std::panic` cannot remove a hook from the middle of a chain, so the
    /// detached hook stays in place as a pass-through. Each attach adds one
    /// more link; toggling attach and detach repeatedly grows the chain.
    #[must_use]
    pub fn attach_thread_hook(self: &Arc<Self>) -> ThreadFailureHook {
        let active = Arc::new(AtomicBool::new(true));
        let registry = Arc::downgrade(self);
        let hook_active = active.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if hook_active.load(Ordering::SeqCst) && !task::in_tracked_task() {
                if let Some(registry) = registry.upgrade() {
                    registry.register(Failure::panic(info.payload()));
                }
            }
            previous(info);
        }));
        tracing::debug!(target: diagnostics::TARGET, "thread failure hook attached");
        ThreadFailureHook { active }
    }
}

/// Guard for a panic hook installed by [`FailureRegistry::attach_thread_hook`]
#[derive(Debug)]
pub struct ThreadFailureHook {
    active: Arc<AtomicBool>,
}

impl ThreadFailureHook {
    /// Check if the hook still funnels panics
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop funnelling panics into the registry
    pub fn detach(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            tracing::debug!(target: diagnostics::TARGET, "thread failure hook detached");
        }
    }
}

impl Drop for ThreadFailureHook {
    fn drop(&mut self) {
        self.detach();
    }
}
