//! Task Wrapper and TaskHandle
//!
//! A [`Task`] wraps one unit of work. Running it stores the outcome in a cell
//! shared with its [`TaskHandle`]; when the work fails and reporting is on,
//! the failure is also staged in the [`FailureRegistry`] before the handle
//! completes. Joining the handle evicts that staged copy, so a failure is
//! observed through exactly one path.
//!
//! A task runs at most once. Running it again is a programming error.

use crate::diagnostics;
use crate::failure::Failure;
use crate::registry::{EntryId, FailureRegistry};
use crate::result::{AsyncError, AsyncResult, BoxError};
use crate::ui_loop::UiLoop;
use std::backtrace::Backtrace;
use std::cell::Cell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe, Location};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

thread_local! {
    static TRACKED: Cell<bool> = const { Cell::new(false) };
}

/// Check if the current thread is running work wrapped by a [`Task`]
pub(crate) fn in_tracked_task() -> bool {
    TRACKED.with(Cell::get)
}

struct TrackedScope {
    previous: bool,
}

impl TrackedScope {
    fn enter() -> Self {
        Self {
            previous: TRACKED.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for TrackedScope {
    fn drop(&mut self) {
        TRACKED.with(|flag| flag.set(self.previous));
    }
}

/// Values a unit of work may return
///
/// Implemented for `()` (side-effecting actions) and `Result<T, E>`
/// (computations that can fail).
pub trait TaskOutput: Send + 'static {
    /// Value delivered to the handle on success
    type Value: Send + 'static;

    /// Split into success value or error
    fn into_outcome(self) -> Result<Self::Value, BoxError>;
}

impl TaskOutput for () {
    type Value = ();

    fn into_outcome(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<T, E> TaskOutput for Result<T, E>
where
    T: Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    type Value = T;

    fn into_outcome(self) -> Result<T, BoxError> {
        self.map_err(Into::into)
    }
}

/// Unique task identifier, used in diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Completion state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Not started yet
    Pending,
    /// Currently executing
    Running,
    /// Finished with a value
    Succeeded,
    /// Finished with a failure
    Failed,
    /// Cancelled before it started
    Cancelled,
}

impl TaskState {
    /// Check if the task reached a final state
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

enum Slot<T> {
    Pending,
    Running,
    Succeeded(Option<T>),
    Failed {
        failure: Failure,
        entry: Option<EntryId>,
    },
    Cancelled,
}

impl<T> Slot<T> {
    const fn state(&self) -> TaskState {
        match self {
            Self::Pending => TaskState::Pending,
            Self::Running => TaskState::Running,
            Self::Succeeded(_) => TaskState::Succeeded,
            Self::Failed { .. } => TaskState::Failed,
            Self::Cancelled => TaskState::Cancelled,
        }
    }
}

struct TaskCell<T> {
    id: TaskId,
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

impl<T> TaskCell<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::new(),
            slot: Mutex::new(Slot::Pending),
            done: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, outcome: Slot<T>) {
        *self.lock() = outcome;
        self.done.notify_all();
    }
}

type Work<T> = Box<dyn FnOnce() -> Result<T, BoxError> + Send + 'static>;

/// A one-shot unit of work bound to a handle
pub struct Task<T: Send + 'static> {
    work: Mutex<Option<Work<T>>>,
    cell: Arc<TaskCell<T>>,
    registry: Option<Arc<FailureRegistry>>,
    origin: &'static Location<'static>,
    submitted_from: Arc<Backtrace>,
    consumed: AtomicBool,
}

impl<T: Send + 'static> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.cell.id)
            .field("origin", &self.origin)
            .field("reports_failures", &self.registry.is_some())
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

impl<T: Send + 'static> Task<T> {
    /// Wrap a unit of work
    ///
    /// Failures are staged in `registry` when one is given. The caller's
    /// location and (when `RUST_BACKTRACE` is set) stack are recorded as the
    /// failure's provenance.
    #[track_caller]
    pub fn new<F, R>(work: F, registry: Option<Arc<FailureRegistry>>) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
        R: TaskOutput<Value = T>,
    {
        Self {
            work: Mutex::new(Some(Box::new(move || work().into_outcome()))),
            cell: TaskCell::new(),
            registry,
            origin: Location::caller(),
            submitted_from: Arc::new(Backtrace::capture()),
            consumed: AtomicBool::new(false),
        }
    }

    /// Task identifier
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.cell.id
    }

    /// Check if the task has already been run
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::SeqCst)
    }

    /// Create a handle observing this task
    ///
    /// Passing the UI loop the task will run on arms the deadlock guard:
    /// joining the pending handle from that loop fails fast.
    #[must_use]
    pub fn handle(&self, ui: Option<Arc<dyn UiLoop>>) -> TaskHandle<T> {
        TaskHandle {
            cell: self.cell.clone(),
            registry: self.registry.clone(),
            ui,
        }
    }

    /// Execute the work and publish its outcome
    ///
    /// # Errors
    ///
    /// Returns a programming error if the task was already run. Failures of
    /// the work itself are published to the handle, never returned here.
    #[track_caller]
    pub fn run(&self) -> AsyncResult<()> {
        if self.consumed.swap(true, Ordering::SeqCst) {
            return Err(AsyncError::programming(format!(
                "task {} was already run; tasks are single-use",
                self.cell.id
            )));
        }
        let work = self
            .work
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(work) = work else {
            return Err(AsyncError::programming("task has no work left to run"));
        };
        {
            let mut slot = self.cell.lock();
            if matches!(*slot, Slot::Cancelled) {
                return Ok(());
            }
            *slot = Slot::Running;
        }

        let outcome = {
            let _scope = TrackedScope::enter();
            catch_unwind(AssertUnwindSafe(work))
        };
        let failure = match outcome {
            Ok(Ok(value)) => {
                self.cell.complete(Slot::Succeeded(Some(value)));
                return Ok(());
            }
            Ok(Err(err)) => Failure::from_box_error(err),
            Err(payload) => Failure::panic(payload.as_ref()),
        };
        let failure = failure.with_origin(self.origin, Some(self.submitted_from.clone()));
        tracing::debug!(
            target: diagnostics::TARGET,
            task = %self.cell.id,
            kind = %failure.kind(),
            "task failed: {}",
            failure.message()
        );
        let entry = self
            .registry
            .as_ref()
            .map(|registry| registry.register(failure.clone()));
        self.cell.complete(Slot::Failed { failure, entry });
        Ok(())
    }
}

/// Observable completion of a dispatched task
pub struct TaskHandle<T> {
    cell: Arc<TaskCell<T>>,
    registry: Option<Arc<FailureRegistry>>,
    ui: Option<Arc<dyn UiLoop>>,
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.cell.id)
            .field("state", &self.state())
            .field("on_ui_loop", &self.ui.is_some())
            .finish()
    }
}

impl<T> TaskHandle<T> {
    /// Task identifier
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.cell.id
    }

    /// Current completion state
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.cell.lock().state()
    }

    /// Check if the task reached a final state
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state().is_done()
    }

    /// Check if failures of this task are also staged in the registry
    #[must_use]
    pub fn reports_failures(&self) -> bool {
        self.registry.is_some()
    }

    /// Cancel the task if it has not started; true if it was cancelled
    pub fn cancel(&self) -> bool {
        let mut slot = self.cell.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Cancelled;
            drop(slot);
            self.cell.done.notify_all();
            return true;
        }
        false
    }

    /// Block until the task completes or `timeout` elapses
    ///
    /// A stored failure is re-raised as [`AsyncError::Execution`] and its
    /// staged registry copy is evicted. The success value can be taken once.
    ///
    /// # Errors
    ///
    /// - `Timeout` if the task did not complete in time
    /// - `Execution` if the work failed
    /// - `Cancelled` if the task was cancelled before it ran
    /// - `Programming` if called on the UI loop the pending task waits for,
    ///   or if the value was already taken
    #[track_caller]
    pub fn join(&self, timeout: Duration) -> AsyncResult<T> {
        let mut slot = self.cell.lock();
        if !slot.state().is_done() {
            if let Some(ui) = &self.ui {
                if ui.is_loop_thread() {
                    return Err(AsyncError::programming(
                        "joining a UI-loop task from the UI loop itself would deadlock",
                    ));
                }
            }
        }
        let deadline = Instant::now() + timeout;
        while !slot.state().is_done() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(AsyncError::timeout(
                    duration_ms(timeout),
                    format!("task {}", self.cell.id),
                ));
            }
            slot = self
                .cell
                .done
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        match &mut *slot {
            Slot::Succeeded(value) => value
                .take()
                .ok_or_else(|| AsyncError::programming("task result was already taken")),
            Slot::Failed { failure, entry } => {
                if let (Some(id), Some(registry)) = (entry.take(), &self.registry) {
                    registry.evict(id);
                }
                Err(AsyncError::Execution(failure.clone()))
            }
            Slot::Cancelled => Err(AsyncError::Cancelled),
            Slot::Pending | Slot::Running => Err(AsyncError::timeout(
                duration_ms(timeout),
                format!("task {}", self.cell.id),
            )),
        }
    }
}

/// Completer for a handle not backed by any work
///
/// Used to turn a listener callback into something a caller can join.
pub(crate) struct Promise<T> {
    cell: Arc<TaskCell<T>>,
}

impl<T> Promise<T> {
    /// Create a pending promise and its handle
    pub(crate) fn new() -> (Self, TaskHandle<T>) {
        let cell = TaskCell::new();
        let handle = TaskHandle {
            cell: cell.clone(),
            registry: None,
            ui: None,
        };
        (Self { cell }, handle)
    }

    /// Resolve with a value; later calls are ignored
    pub(crate) fn succeed(&self, value: T) -> bool {
        let mut slot = self.cell.lock();
        if matches!(*slot, Slot::Pending | Slot::Running) {
            *slot = Slot::Succeeded(Some(value));
            drop(slot);
            self.cell.done.notify_all();
            return true;
        }
        false
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::ui_loop::LoopTask;
    use std::thread;

    #[derive(Debug, thiserror::Error)]
    #[error("divide by zero")]
    struct DivideByZero;

    fn quiet_registry() -> Arc<FailureRegistry> {
        let registry = FailureRegistry::new();
        registry.set_print_on_register(false);
        Arc::new(registry)
    }

    const JOIN: Duration = Duration::from_secs(5);

    mod outcome_tests {
        use super::*;

        #[test]
        fn test_success_value_reaches_handle() {
            let task = Task::new(|| Ok::<_, DivideByZero>(42), None);
            let handle = task.handle(None);
            assert_eq!(handle.state(), TaskState::Pending);
            task.run().unwrap();
            assert_eq!(handle.state(), TaskState::Succeeded);
            assert_eq!(handle.join(JOIN).unwrap(), 42);
        }

        #[test]
        fn test_unit_work() {
            let task = Task::new(|| {}, None);
            let handle = task.handle(None);
            task.run().unwrap();
            handle.join(JOIN).unwrap();
        }

        #[test]
        fn test_value_can_only_be_taken_once() {
            let task = Task::new(|| Ok::<_, DivideByZero>("once"), None);
            let handle = task.handle(None);
            task.run().unwrap();
            assert_eq!(handle.join(JOIN).unwrap(), "once");
            assert!(handle.join(JOIN).unwrap_err().is_programming());
        }

        #[test]
        fn test_error_keeps_original_cause() {
            let task = Task::new(|| Err::<(), _>(DivideByZero), None);
            let handle = task.handle(None);
            task.run().unwrap();
            let err = handle.join(JOIN).unwrap_err();
            let failure = err.failure().unwrap();
            assert!(failure.downcast_ref::<DivideByZero>().is_some());
            assert!(failure.origin().unwrap().file().ends_with("task.rs"));
        }

        #[test]
        fn test_panic_becomes_failure() {
            let task = Task::new(|| -> () { panic!("exploded") }, None);
            let handle = task.handle(None);
            task.run().unwrap();
            let err = handle.join(JOIN).unwrap_err();
            let failure = err.failure().unwrap();
            assert!(failure.is_panic());
            assert_eq!(failure.message(), "exploded");
            assert!(!in_tracked_task());
        }

        #[test]
        fn test_execution_wrapper_is_unwrapped_once() {
            let inner = Failure::msg("root cause");
            let task = Task::new(
                move || Err::<(), _>(AsyncError::Execution(inner)),
                None,
            );
            let handle = task.handle(None);
            task.run().unwrap();
            let err = handle.join(JOIN).unwrap_err();
            assert_eq!(err.failure().unwrap().message(), "root cause");
        }
    }

    mod one_shot_tests {
        use super::*;

        #[test]
        fn test_second_run_is_programming_error() {
            let task = Task::new(|| {}, None);
            task.run().unwrap();
            assert!(task.is_consumed());
            let err = task.run().unwrap_err();
            assert!(err.is_programming());
        }
    }

    mod registry_tests {
        use super::*;

        #[test]
        fn test_failure_is_staged_and_evicted_on_join() {
            let registry = quiet_registry();
            let task = Task::new(|| Err::<(), _>(DivideByZero), Some(registry.clone()));
            let handle = task.handle(None);
            task.run().unwrap();
            assert_eq!(registry.len(), 1);
            assert!(handle.join(JOIN).is_err());
            assert!(registry.is_empty());
        }

        #[test]
        fn test_unreported_failure_is_not_staged() {
            let registry = quiet_registry();
            let task = Task::new(|| Err::<(), _>(DivideByZero), None);
            let handle = task.handle(None);
            task.run().unwrap();
            assert!(!handle.reports_failures());
            assert!(registry.is_empty());
            assert!(handle.join(JOIN).is_err());
        }

        #[test]
        fn test_join_after_out_of_band_consume_still_fails() {
            let registry = quiet_registry();
            let task = Task::new(|| Err::<(), _>(DivideByZero), Some(registry.clone()));
            let handle = task.handle(None);
            task.run().unwrap();
            assert!(registry.consume_one().is_some());
            assert!(handle.join(JOIN).is_err());
            assert!(registry.is_empty());
        }

        #[test]
        fn test_repeated_join_returns_same_failure() {
            let registry = quiet_registry();
            let task = Task::new(|| Err::<(), _>(DivideByZero), Some(registry.clone()));
            let handle = task.handle(None);
            task.run().unwrap();
            let first = handle.join(JOIN).unwrap_err();
            let second = handle.join(JOIN).unwrap_err();
            assert!(first.failure().unwrap().same_as(second.failure().unwrap()));
        }
    }

    mod waiting_tests {
        use super::*;

        #[test]
        fn test_join_times_out() {
            let task = Task::new(|| {}, None);
            let handle = task.handle(None);
            let start = Instant::now();
            let err = handle.join(Duration::from_millis(30)).unwrap_err();
            assert!(err.is_timeout());
            assert!(start.elapsed() >= Duration::from_millis(30));
        }

        #[test]
        fn test_join_wakes_on_completion() {
            let task = Arc::new(Task::new(|| Ok::<_, DivideByZero>(7), None));
            let handle = task.handle(None);
            let runner = task.clone();
            let worker = thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                runner.run().unwrap();
            });
            assert_eq!(handle.join(JOIN).unwrap(), 7);
            worker.join().unwrap();
        }

        #[test]
        fn test_cancel_before_run() {
            let ran = Arc::new(AtomicBool::new(false));
            let flag = ran.clone();
            let task = Task::new(move || flag.store(true, Ordering::SeqCst), None);
            let handle = task.handle(None);
            assert!(handle.cancel());
            task.run().unwrap();
            assert!(!ran.load(Ordering::SeqCst));
            assert_eq!(handle.state(), TaskState::Cancelled);
            assert!(matches!(handle.join(JOIN), Err(AsyncError::Cancelled)));
        }

        #[test]
        fn test_cancel_after_completion_is_noop() {
            let task = Task::new(|| {}, None);
            let handle = task.handle(None);
            task.run().unwrap();
            assert!(!handle.cancel());
            assert!(handle.is_done());
        }
    }

    mod deadlock_guard_tests {
        use super::*;

        struct AlwaysLoop;

        impl UiLoop for AlwaysLoop {
            fn is_loop_thread(&self) -> bool {
                true
            }

            fn post(&self, _task: LoopTask) {}
        }

        #[test]
        fn test_join_pending_from_loop_thread_fails_fast() {
            let task = Task::new(|| {}, None);
            let handle = task.handle(Some(Arc::new(AlwaysLoop)));
            let start = Instant::now();
            let err = handle.join(Duration::from_secs(30)).unwrap_err();
            assert!(err.is_programming());
            assert!(start.elapsed() < Duration::from_secs(1));
        }

        #[test]
        fn test_join_completed_from_loop_thread_is_fine() {
            let task = Task::new(|| Ok::<_, DivideByZero>(1), None);
            let handle = task.handle(Some(Arc::new(AlwaysLoop)));
            task.run().unwrap();
            assert_eq!(handle.join(JOIN).unwrap(), 1);
        }
    }

    mod promise_tests {
        use super::*;

        #[test]
        fn test_promise_resolves_once() {
            let (promise, handle) = Promise::new();
            assert!(promise.succeed(true));
            assert!(!promise.succeed(false));
            assert!(handle.join(JOIN).unwrap());
        }
    }
}
