//! Condition Waiter
//!
//! Blocks the calling thread until a set of predicates, each evaluated on the
//! UI loop, holds. One wait moves through
//! `Idle -> Polling -> {Satisfied, TimedOut, Interrupted, Failed}`:
//!
//! 1. give up once the timeout has elapsed
//! 2. sleep the poll interval (skipped when zero)
//! 3. post one evaluation to the loop and join it within the remaining budget
//!    (at least 1ms); if that join times out the loop is unresponsive and the
//!    wait ends as timed out instead of retrying
//!
//! Predicates are combined with AND in insertion order and short-circuit on
//! the first false one.

use crate::conditions::UiCondition;
use crate::diagnostics;
use crate::failure::Failure;
use crate::interrupt::Interrupt;
use crate::result::{AsyncError, AsyncResult};
use crate::task::{duration_ms, Task};
use crate::ui_loop::{run_on_loop, UiLoop};
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Where a condition wait is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaiterState {
    /// Not started
    Idle,
    /// Evaluating and sleeping
    Polling,
    /// Every predicate held
    Satisfied,
    /// The budget ran out
    TimedOut,
    /// The wait was interrupted
    Interrupted,
    /// A predicate raised a failure
    Failed,
}

/// How a wait that did not fail ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitOutcome {
    /// The awaited condition holds
    Satisfied,
    /// The wait was interrupted and returned early
    Interrupted,
}

impl WaitOutcome {
    /// Check if the condition holds
    #[must_use]
    pub const fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

/// Overridable callbacks run when a wait gives up
///
/// The defaults emit a stall report through `tracing`: the loop thread's name,
/// the elapsed time, and the waiting thread's trace.
pub trait WaitHooks: Send + Sync {
    /// Called before a timeout error is raised
    fn on_timeout(&self, elapsed: Duration, loop_thread: Option<&str>) {
        tracing::warn!(
            target: diagnostics::TARGET,
            "{}",
            diagnostics::stall_report("timeout", loop_thread, elapsed)
        );
    }

    /// Called before an interrupted wait returns
    fn on_interrupted(&self, elapsed: Duration, loop_thread: Option<&str>) {
        tracing::warn!(
            target: diagnostics::TARGET,
            "{}",
            diagnostics::stall_report("interruption", loop_thread, elapsed)
        );
    }
}

/// Hooks that only emit the default diagnostics
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticHooks;

impl WaitHooks for DiagnosticHooks {}

/// Wrapper for a failure raised while a predicate was evaluated
#[derive(Debug, thiserror::Error)]
#[error("Exception during waiting for condition on UI loop")]
pub struct ConditionFailed {
    #[source]
    failure: Failure,
}

impl ConditionFailed {
    /// The failure raised by the predicate
    #[must_use]
    pub const fn failure(&self) -> &Failure {
        &self.failure
    }
}

type Conditions = Arc<Mutex<Vec<Box<dyn UiCondition>>>>;

/// Polling state machine for predicates evaluated on the UI loop
pub struct ConditionWaiter {
    ui: Arc<dyn UiLoop>,
    timeout: Duration,
    sleep: Duration,
    conditions: Conditions,
    hooks: Arc<dyn WaitHooks>,
    interrupt: Interrupt,
    trace_timing: bool,
    state: WaiterState,
}

impl fmt::Debug for ConditionWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionWaiter")
            .field("timeout", &self.timeout)
            .field("sleep", &self.sleep)
            .field("conditions", &self.describe())
            .field("state", &self.state)
            .finish()
    }
}

impl ConditionWaiter {
    /// Create a waiter with no predicates
    #[must_use]
    pub fn new(ui: Arc<dyn UiLoop>, timeout: Duration) -> Self {
        Self {
            ui,
            timeout,
            sleep: Duration::ZERO,
            conditions: Arc::new(Mutex::new(Vec::new())),
            hooks: Arc::new(DiagnosticHooks),
            interrupt: Interrupt::new(),
            trace_timing: false,
            state: WaiterState::Idle,
        }
    }

    /// Set the sleep between evaluations
    #[must_use]
    pub const fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    /// Add a predicate; predicates are checked in the order added
    #[must_use]
    pub fn with_condition(self, condition: impl UiCondition + 'static) -> Self {
        self.with_boxed_condition(Box::new(condition))
    }

    /// Add an already boxed predicate
    #[must_use]
    pub fn with_boxed_condition(self, condition: Box<dyn UiCondition>) -> Self {
        self.conditions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(condition);
        self
    }

    /// Replace the timeout and interrupt hooks
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn WaitHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Use a shared interruption token
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Emit timing traces
    #[must_use]
    pub const fn with_trace_timing(mut self, enabled: bool) -> Self {
        self.trace_timing = enabled;
        self
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> WaiterState {
        self.state
    }

    /// Descriptions of the registered predicates
    #[must_use]
    pub fn describe(&self) -> String {
        let conditions = self
            .conditions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let parts: Vec<String> = conditions.iter().map(|c| c.describe()).collect();
        parts.join(" and ")
    }

    /// Run the wait to completion
    ///
    /// # Errors
    ///
    /// - `Programming` if called on the UI loop thread or run twice
    /// - `Timeout` if the predicates did not all hold within the timeout
    /// - `Execution` wrapping [`ConditionFailed`] if a predicate failed
    #[track_caller]
    pub fn wait(&mut self) -> AsyncResult<WaitOutcome> {
        if self.ui.is_loop_thread() {
            return Err(AsyncError::programming(
                "waiting for a UI-loop condition from the UI loop itself would deadlock",
            ));
        }
        if self.state != WaiterState::Idle {
            return Err(AsyncError::programming(format!(
                "condition waiter already ran and ended {:?}",
                self.state
            )));
        }
        self.state = WaiterState::Polling;
        let start = Instant::now();
        loop {
            let elapsed = start.elapsed();
            if elapsed > self.timeout {
                return Err(self.timed_out(elapsed));
            }
            if !self.sleep.is_zero() && self.interrupt.sleep(self.sleep).is_err() {
                return Ok(self.interrupted(start.elapsed()));
            }
            let budget = self
                .timeout
                .saturating_sub(start.elapsed())
                .max(Duration::from_millis(1));
            match self.evaluate_on_loop(budget) {
                Ok(true) => {
                    self.state = WaiterState::Satisfied;
                    if self.trace_timing {
                        tracing::debug!(
                            target: diagnostics::TARGET,
                            elapsed_ms = duration_ms(start.elapsed()),
                            "condition wait satisfied: {}",
                            self.describe()
                        );
                    }
                    return Ok(WaitOutcome::Satisfied);
                }
                Ok(false) if self.interrupt.take() => {
                    return Ok(self.interrupted(start.elapsed()));
                }
                Ok(false) => {}
                Err(err) if err.is_timeout() => return Err(self.timed_out(start.elapsed())),
                Err(AsyncError::Execution(failure)) => {
                    self.state = WaiterState::Failed;
                    return Err(AsyncError::Execution(Failure::error(Box::new(
                        ConditionFailed { failure },
                    ))));
                }
                Err(err) => {
                    self.state = WaiterState::Failed;
                    return Err(err);
                }
            }
        }
    }

    fn evaluate_on_loop(&self, budget: Duration) -> AsyncResult<bool> {
        let conditions = self.conditions.clone();
        let task = Task::new(
            move || {
                let mut conditions = conditions.lock().unwrap_or_else(PoisonError::into_inner);
                let holds = conditions.iter_mut().all(|condition| condition.evaluate());
                Ok::<bool, Infallible>(holds)
            },
            None,
        );
        let handle = task.handle(Some(self.ui.clone()));
        run_on_loop(
            self.ui.as_ref(),
            Box::new(move || {
                let _ = task.run();
            }),
        );
        let result = handle.join(budget);
        if result.is_err() {
            handle.cancel();
        }
        result
    }

    fn timed_out(&mut self, elapsed: Duration) -> AsyncError {
        self.state = WaiterState::TimedOut;
        let loop_thread = self.ui.thread_name();
        self.hooks.on_timeout(elapsed, loop_thread.as_deref());
        AsyncError::timeout(
            duration_ms(self.timeout),
            format!("UI loop condition ({})", self.describe()),
        )
    }

    fn interrupted(&mut self, elapsed: Duration) -> WaitOutcome {
        self.state = WaiterState::Interrupted;
        let loop_thread = self.ui.thread_name();
        self.hooks.on_interrupted(elapsed, loop_thread.as_deref());
        WaitOutcome::Interrupted
    }
}
