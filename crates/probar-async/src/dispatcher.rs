//! Dispatcher
//!
//! Entry point for test code: submit work to the background pool or the UI
//! loop, join the resulting handles, and wait for conditions.
//!
//! A dispatcher captures one [`TimingProfile`] at construction. Switching
//! profiles returns a new dispatcher that shares the registry, pool and loop,
//! so waits already in flight keep the values they started with.
//!
//! Every blocking call takes or derives an explicit timeout.

use crate::conditions::{EventCounter, RenderPulseCounter, UiCondition};
use crate::config::DispatcherConfig;
use crate::diagnostics;
use crate::interrupt::Interrupt;
use crate::observable::ObservableBool;
use crate::pool::{PoolConfig, WorkerPool};
use crate::registry::{FailureRegistry, ThreadFailureHook};
use crate::result::{AsyncError, AsyncResult};
use crate::task::{duration_ms, Promise, Task, TaskHandle, TaskOutput};
use crate::timing::{TimingProfile, UI_CONDITION_SLEEP_MS};
use crate::ui_loop::{run_on_loop, UiLoop};
use crate::waiter::{ConditionWaiter, WaitOutcome};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Builder for [`Dispatcher`]
#[derive(Debug)]
pub struct DispatcherBuilder {
    ui: Arc<dyn UiLoop>,
    registry: Option<Arc<FailureRegistry>>,
    pool: PoolConfig,
    timing: TimingProfile,
    interrupt: Interrupt,
}

impl DispatcherBuilder {
    /// Use a dedicated failure registry instead of the process-wide one
    #[must_use]
    pub fn registry(mut self, registry: Arc<FailureRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the background pool settings
    #[must_use]
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the timing profile
    #[must_use]
    pub const fn timing(mut self, timing: TimingProfile) -> Self {
        self.timing = timing;
        self
    }

    /// Share an interruption token with every wait
    #[must_use]
    pub fn interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Build the dispatcher
    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            registry: self.registry.unwrap_or_else(FailureRegistry::global),
            pool: WorkerPool::new(self.pool),
            ui: self.ui,
            timing: self.timing,
            interrupt: self.interrupt,
            thread_hook: Arc::new(Mutex::new(None)),
        }
    }
}

/// Coordinates work across the calling thread, the pool and the UI loop
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<FailureRegistry>,
    pool: WorkerPool,
    ui: Arc<dyn UiLoop>,
    timing: TimingProfile,
    interrupt: Interrupt,
    thread_hook: Arc<Mutex<Option<ThreadFailureHook>>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .field("ui", &self.ui)
            .field("timing", &self.timing)
            .field("check_all_thread_failures", &self.check_all_thread_failures())
            .finish()
    }
}

impl Dispatcher {
    /// Dispatcher for `ui` with default settings and the process-wide registry
    #[must_use]
    pub fn new(ui: Arc<dyn UiLoop>) -> Self {
        Self::builder(ui).build()
    }

    /// Create a builder
    #[must_use]
    pub fn builder(ui: Arc<dyn UiLoop>) -> DispatcherBuilder {
        DispatcherBuilder {
            ui,
            registry: None,
            pool: PoolConfig::default(),
            timing: TimingProfile::default(),
            interrupt: Interrupt::new(),
        }
    }

    /// Build from configuration, applying its flags to the process-wide registry
    #[must_use]
    pub fn from_config(config: &DispatcherConfig, ui: Arc<dyn UiLoop>) -> Self {
        Self::from_config_with_registry(config, ui, FailureRegistry::global())
    }

    /// Build from configuration with a dedicated registry
    #[must_use]
    pub fn from_config_with_registry(
        config: &DispatcherConfig,
        ui: Arc<dyn UiLoop>,
        registry: Arc<FailureRegistry>,
    ) -> Self {
        let dispatcher = Self::builder(ui)
            .registry(registry)
            .pool(config.pool.clone())
            .timing(config.timing_profile())
            .build();
        dispatcher.set_auto_check_failures(config.auto_check_failures);
        dispatcher.set_print_failures_on_occurrence(config.print_failures_on_occurrence);
        dispatcher.set_check_all_thread_failures(config.check_all_thread_failures);
        dispatcher
    }

    // ------------------------------------------------------------------
    // Accessors and profile switching
    // ------------------------------------------------------------------

    /// The failure registry
    #[must_use]
    pub fn registry(&self) -> &Arc<FailureRegistry> {
        &self.registry
    }

    /// The UI loop
    #[must_use]
    pub fn ui(&self) -> &Arc<dyn UiLoop> {
        &self.ui
    }

    /// The background pool
    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// The captured timing profile
    #[must_use]
    pub const fn timing(&self) -> &TimingProfile {
        &self.timing
    }

    /// Interruption token shared by this dispatcher's waits
    #[must_use]
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Same dispatcher with another timing profile
    #[must_use]
    pub fn with_timing(&self, timing: TimingProfile) -> Self {
        let mut next = self.clone();
        next.timing = timing;
        next
    }

    /// Same dispatcher with the default profile
    #[must_use]
    pub fn use_default_timing(&self) -> Self {
        self.with_timing(TimingProfile::default_profile())
    }

    /// Same dispatcher with the aggressive profile
    #[must_use]
    pub fn use_aggressive_timing(&self) -> Self {
        self.with_timing(TimingProfile::aggressive())
    }

    /// Same dispatcher with the debug profile
    #[must_use]
    pub fn use_debug_timing(&self) -> Self {
        self.with_timing(TimingProfile::debug())
    }

    // ------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------

    /// Whether each dispatch first surfaces a stale failure
    #[must_use]
    pub fn auto_check_failures(&self) -> bool {
        self.registry.auto_check()
    }

    /// Enable or disable auto-check
    pub fn set_auto_check_failures(&self, enabled: bool) {
        self.registry.set_auto_check(enabled);
    }

    /// Whether failures are reported as soon as they are staged
    #[must_use]
    pub fn print_failures_on_occurrence(&self) -> bool {
        self.registry.print_on_register()
    }

    /// Enable or disable reporting on occurrence
    pub fn set_print_failures_on_occurrence(&self, enabled: bool) {
        self.registry.set_print_on_register(enabled);
    }

    /// Whether panics from every thread are funnelled into the registry
    #[must_use]
    pub fn check_all_thread_failures(&self) -> bool {
        self.thread_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(ThreadFailureHook::is_attached)
    }

    /// Attach or detach the process-wide panic hook
    ///
    /// This mutates process state: the hook sees panics on every thread.
    /// Detaching leaves a pass-through hook behind, so every off/on cycle
    /// lengthens the process panic-hook chain by one link.
    pub fn set_check_all_thread_failures(&self, enabled: bool) {
        let mut hook = self
            .thread_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match (enabled, hook.is_some()) {
            (true, false) => *hook = Some(self.registry.attach_thread_hook()),
            (false, true) => {
                if let Some(hook) = hook.take() {
                    hook.detach();
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Run work on the background pool, staging failures in the registry
    ///
    /// # Errors
    ///
    /// Returns the oldest stale failure when auto-check is on and one is staged
    #[track_caller]
    pub fn run_async<F, R>(&self, work: F) -> AsyncResult<TaskHandle<R::Value>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: TaskOutput,
    {
        self.run_async_with(work, true)
    }

    /// Run work on the background pool
    ///
    /// With `report_failures` off, joining the handle is the only way to see
    /// a failure.
    ///
    /// # Errors
    ///
    /// Returns the oldest stale failure when auto-check is on and one is staged
    #[track_caller]
    pub fn run_async_with<F, R>(
        &self,
        work: F,
        report_failures: bool,
    ) -> AsyncResult<TaskHandle<R::Value>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: TaskOutput,
    {
        self.registry.surface_stale()?;
        let task = Task::new(work, report_failures.then(|| self.registry.clone()));
        let handle = task.handle(None);
        self.pool.execute(Box::new(move || {
            if let Err(err) = task.run() {
                tracing::error!(target: diagnostics::TARGET, "{err}");
            }
        }));
        Ok(handle)
    }

    /// Run work on the UI loop, in place when already on it
    ///
    /// # Errors
    ///
    /// Returns the oldest stale failure when auto-check is on and one is staged
    #[track_caller]
    pub fn run_on_ui_thread<F, R>(&self, work: F) -> AsyncResult<TaskHandle<R::Value>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: TaskOutput,
    {
        self.registry.surface_stale()?;
        let task = Task::new(work, Some(self.registry.clone()));
        let handle = task.handle(Some(self.ui.clone()));
        run_on_loop(
            self.ui.as_ref(),
            Box::new(move || {
                if let Err(err) = task.run() {
                    tracing::error!(target: diagnostics::TARGET, "{err}");
                }
            }),
        );
        Ok(handle)
    }

    // ------------------------------------------------------------------
    // Joining
    // ------------------------------------------------------------------

    /// Join a handle within `timeout`
    ///
    /// # Errors
    ///
    /// See [`TaskHandle::join`]
    #[track_caller]
    pub fn wait_for<T>(&self, handle: &TaskHandle<T>, timeout: Duration) -> AsyncResult<T> {
        let start = Instant::now();
        let result = handle.join(timeout);
        self.trace("wait_for", start);
        result
    }

    /// Join a handle within the profile's join timeout
    ///
    /// # Errors
    ///
    /// See [`TaskHandle::join`]
    #[track_caller]
    pub fn wait<T>(&self, handle: &TaskHandle<T>) -> AsyncResult<T> {
        self.wait_for(handle, self.timing.join_timeout())
    }

    /// Run on the pool without reporting and join within `timeout`
    ///
    /// # Errors
    ///
    /// Stale failure (auto-check), `Timeout`, or the work's failure
    #[track_caller]
    pub fn wait_for_async<F, R>(&self, timeout: Duration, work: F) -> AsyncResult<R::Value>
    where
        F: FnOnce() -> R + Send + 'static,
        R: TaskOutput,
    {
        let handle = self.run_async_with(work, false)?;
        let result = self.wait_for(&handle, timeout);
        if result.is_err() {
            handle.cancel();
        }
        result
    }

    /// Run on the UI loop and join within `timeout`
    ///
    /// # Errors
    ///
    /// Stale failure (auto-check), `Timeout`, or the work's failure
    #[track_caller]
    pub fn wait_for_async_ui<F, R>(&self, timeout: Duration, work: F) -> AsyncResult<R::Value>
    where
        F: FnOnce() -> R + Send + 'static,
        R: TaskOutput,
    {
        let handle = self.run_on_ui_thread(work)?;
        let result = self.wait_for(&handle, timeout);
        if result.is_err() {
            handle.cancel();
        }
        result
    }

    // ------------------------------------------------------------------
    // Waiting on the calling thread
    // ------------------------------------------------------------------

    /// Poll `predicate` on the calling thread until it holds
    ///
    /// Sleeps the profile's condition interval between polls.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` once `timeout` has elapsed with the predicate false
    pub fn wait_until<P>(&self, timeout: Duration, mut predicate: P) -> AsyncResult<WaitOutcome>
    where
        P: FnMut() -> bool,
    {
        let start = Instant::now();
        let poll = self.timing.condition_sleep();
        while !predicate() {
            if poll.is_zero() {
                thread::yield_now();
            } else if self.interrupt.sleep(poll).is_err() {
                return Ok(WaitOutcome::Interrupted);
            }
            if start.elapsed() >= timeout {
                return Err(AsyncError::timeout(duration_ms(timeout), "predicate"));
            }
        }
        self.trace("wait_until", start);
        Ok(WaitOutcome::Satisfied)
    }

    /// Block until `observable` is true
    ///
    /// Returns immediately when it already is.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the value does not become true in time
    pub fn wait_for_value(
        &self,
        timeout: Duration,
        observable: &dyn ObservableBool,
    ) -> AsyncResult<()> {
        let (promise, handle) = Promise::new();
        let id = observable.add_listener(Arc::new(move |value| {
            if value {
                promise.succeed(());
            }
        }));
        let result = if observable.get() {
            Ok(())
        } else {
            handle.join(timeout).map_err(|err| match err {
                AsyncError::Timeout { ms, .. } => {
                    AsyncError::timeout(ms, "observable value to become true")
                }
                other => other,
            })
        };
        observable.remove_listener(id);
        result
    }

    /// Sleep the calling thread; an interruption just ends the sleep early
    pub fn sleep(&self, duration: Duration) {
        let _ = self.interrupt.sleep(duration);
    }

    // ------------------------------------------------------------------
    // Waiting on the UI loop
    // ------------------------------------------------------------------

    #[track_caller]
    fn guard_off_loop(&self, operation: &str) -> AsyncResult<()> {
        if self.ui.is_loop_thread() {
            return Err(AsyncError::programming(format!(
                "{operation} must not be called on the UI loop thread; it waits for that loop"
            )));
        }
        Ok(())
    }

    /// Let the UI loop settle using the profile's attempts and pulses
    ///
    /// # Errors
    ///
    /// `Programming` on the UI loop thread, `Timeout` if the loop does not
    /// turn over in time
    #[track_caller]
    pub fn wait_for_ui_idle(&self) -> AsyncResult<WaitOutcome> {
        self.wait_for_ui_events(
            self.timing.attempts,
            self.timing.background_sleep(),
            self.timing.pulses,
            self.timing.ui_timeout(),
        )
    }

    /// Let `attempts` loop turns and `pulses` render pulses pass
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::wait_for_ui_idle`]
    #[track_caller]
    pub fn wait_for_ui_idle_with(&self, attempts: u32, pulses: u32) -> AsyncResult<WaitOutcome> {
        self.wait_for_ui_events(
            attempts,
            self.timing.background_sleep(),
            pulses,
            self.timing.ui_timeout(),
        )
    }

    /// Let `attempts` loop turns and `pulses` render pulses pass, polling
    /// every `sleep`, within `timeout`
    ///
    /// A no-op when both counts are zero.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::wait_for_ui_idle`]
    #[track_caller]
    pub fn wait_for_ui_events(
        &self,
        attempts: u32,
        sleep: Duration,
        pulses: u32,
        timeout: Duration,
    ) -> AsyncResult<WaitOutcome> {
        self.guard_off_loop("wait_for_ui_events")?;
        if attempts == 0 && pulses == 0 {
            return Ok(WaitOutcome::Satisfied);
        }
        let mut waiter = self.waiter(timeout).with_sleep(sleep);
        if attempts > 0 {
            waiter = waiter.with_condition(EventCounter::new(attempts));
        }
        if pulses > 0 {
            waiter = waiter.with_condition(RenderPulseCounter::new(self.ui.clone(), pulses));
        }
        waiter.wait()
    }

    /// Wait until `condition`, evaluated on the UI loop, holds
    ///
    /// # Errors
    ///
    /// `Programming` on the UI loop thread, `Timeout`, or `Execution` if the
    /// condition failed
    #[track_caller]
    pub fn wait_for_ui_condition<C>(
        &self,
        timeout: Duration,
        condition: C,
    ) -> AsyncResult<WaitOutcome>
    where
        C: UiCondition + 'static,
    {
        self.guard_off_loop("wait_for_ui_condition")?;
        self.waiter(timeout)
            .with_sleep(Duration::from_millis(UI_CONDITION_SLEEP_MS))
            .with_condition(condition)
            .wait()
    }

    /// A condition waiter wired to this dispatcher's loop and settings
    #[must_use]
    pub fn waiter(&self, timeout: Duration) -> ConditionWaiter {
        ConditionWaiter::new(self.ui.clone(), timeout)
            .with_interrupt(self.interrupt.clone())
            .with_trace_timing(self.timing.trace_timing)
    }

    // ------------------------------------------------------------------
    // Pending failures
    // ------------------------------------------------------------------

    /// Surface the oldest staged failure
    ///
    /// First lets the UI loop settle so recently finished work has had a
    /// chance to register.
    ///
    /// # Errors
    ///
    /// `Execution` with the oldest staged failure, `Programming` on the UI
    /// loop thread, or a `Timeout` from the settle step
    #[track_caller]
    pub fn check_pending_failure(&self) -> AsyncResult<()> {
        self.wait_for_ui_idle()?;
        match self.registry.consume_one() {
            Some(failure) => Err(AsyncError::Execution(failure)),
            None => Ok(()),
        }
    }

    /// Drop every staged failure
    pub fn clear_pending_failures(&self) {
        self.registry.clear();
    }

    fn trace(&self, operation: &str, start: Instant) {
        if self.timing.trace_timing {
            tracing::debug!(
                target: diagnostics::TARGET,
                elapsed_ms = duration_ms(start.elapsed()),
                profile = %self.timing.name,
                "{operation} finished"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use crate::observable::BoolProperty;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("divide by zero")]
    struct DivideByZero;

    const JOIN: Duration = Duration::from_secs(5);

    fn dispatcher() -> Dispatcher {
        let registry = Arc::new(FailureRegistry::new());
        registry.set_print_on_register(false);
        Dispatcher::builder(Arc::new(EventLoop::spawn().unwrap()))
            .registry(registry)
            .build()
    }

    mod dispatch_tests {
        use super::*;

        #[test]
        fn test_run_async_returns_value() {
            let d = dispatcher();
            let handle = d.run_async(|| Ok::<_, DivideByZero>(2 + 2)).unwrap();
            assert_eq!(d.wait_for(&handle, JOIN).unwrap(), 4);
        }

        #[test]
        fn test_run_async_uses_named_pool_thread() {
            let d = dispatcher();
            let handle = d
                .run_async(|| {
                    Ok::<_, DivideByZero>(thread::current().name().map(str::to_string))
                })
                .unwrap();
            let name = d.wait(&handle).unwrap().unwrap();
            assert!(name.starts_with("probar-async-pool-thread-"));
        }

        #[test]
        fn test_run_on_ui_thread_runs_on_loop() {
            let d = dispatcher();
            let ui = d.ui().clone();
            let handle = d
                .run_on_ui_thread(move || Ok::<_, DivideByZero>(ui.is_loop_thread()))
                .unwrap();
            assert!(d.wait_for(&handle, JOIN).unwrap());
        }

        #[test]
        fn test_run_on_ui_thread_in_place_on_loop() {
            let d = dispatcher();
            let inner = d.clone();
            let handle = d
                .run_on_ui_thread(move || {
                    let nested = inner.run_on_ui_thread(|| Ok::<_, DivideByZero>(5))?;
                    let done = nested.is_done();
                    inner.wait_for(&nested, JOIN).map(|v| (v, done))
                })
                .unwrap();
            assert_eq!(d.wait_for(&handle, JOIN).unwrap(), (5, true));
        }

        #[test]
        fn test_auto_check_fails_next_dispatch() {
            let d = dispatcher();
            let failing = d.run_async(|| Err::<(), _>(DivideByZero)).unwrap();
            while !failing.is_done() {
                thread::sleep(Duration::from_millis(1));
            }
            let err = d.run_async(|| {}).unwrap_err();
            assert!(err.failure().unwrap().is_delayed());
            assert!(d.registry().is_empty());
        }

        #[test]
        fn test_auto_check_disabled() {
            let d = dispatcher();
            d.set_auto_check_failures(false);
            let failing = d.run_async(|| Err::<(), _>(DivideByZero)).unwrap();
            while !failing.is_done() {
                thread::sleep(Duration::from_millis(1));
            }
            assert!(d.run_async(|| {}).is_ok());
            assert_eq!(d.registry().len(), 1);
        }
    }

    mod wait_until_tests {
        use super::*;

        #[test]
        fn test_predicate_true_returns_immediately() {
            let d = dispatcher();
            assert!(d.wait_until(JOIN, || true).unwrap().is_satisfied());
        }

        #[test]
        fn test_predicate_flips() {
            let d = dispatcher();
            let flag = Arc::new(AtomicBool::new(false));
            let setter = flag.clone();
            let worker = thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                setter.store(true, Ordering::SeqCst);
            });
            let outcome = d.wait_until(JOIN, || flag.load(Ordering::SeqCst)).unwrap();
            assert!(outcome.is_satisfied());
            worker.join().unwrap();
        }

        #[test]
        fn test_aggressive_profile_still_times_out() {
            let d = dispatcher().use_aggressive_timing();
            let err = d.wait_until(Duration::from_millis(20), || false).unwrap_err();
            assert!(err.is_timeout());
        }

        #[test]
        fn test_interrupt_is_soft() {
            let d = dispatcher();
            d.interrupt().interrupt();
            let outcome = d.wait_until(JOIN, || false).unwrap();
            assert_eq!(outcome, WaitOutcome::Interrupted);
        }

        #[test]
        fn test_waits_after_interrupt_run_normally() {
            let d = dispatcher();
            d.interrupt().interrupt();
            assert_eq!(d.wait_for_ui_idle().unwrap(), WaitOutcome::Interrupted);

            let mut polls = 0;
            let outcome = d
                .wait_until(JOIN, move || {
                    polls += 1;
                    polls >= 3
                })
                .unwrap();
            assert_eq!(outcome, WaitOutcome::Satisfied);
            assert_eq!(d.wait_for_ui_idle().unwrap(), WaitOutcome::Satisfied);
            assert!(d.clone().check_pending_failure().is_ok());
        }
    }

    mod observable_tests {
        use super::*;

        #[test]
        fn test_already_true_falls_through() {
            let d = dispatcher();
            let prop = BoolProperty::new(true);
            d.wait_for_value(Duration::from_millis(1), &prop).unwrap();
            assert_eq!(prop.listener_count(), 0);
        }

        #[test]
        fn test_becomes_true() {
            let d = dispatcher();
            let prop = Arc::new(BoolProperty::new(false));
            let setter = prop.clone();
            let worker = thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                setter.set(true);
            });
            d.wait_for_value(JOIN, prop.as_ref()).unwrap();
            worker.join().unwrap();
            assert_eq!(prop.listener_count(), 0);
        }

        #[test]
        fn test_never_true_times_out() {
            let d = dispatcher();
            let prop = BoolProperty::new(false);
            let err = d.wait_for_value(Duration::from_millis(30), &prop).unwrap_err();
            assert!(err.is_timeout());
            assert_eq!(prop.listener_count(), 0);
        }
    }

    mod ui_wait_tests {
        use super::*;

        #[test]
        fn test_wait_for_ui_idle() {
            let d = dispatcher();
            assert!(d.wait_for_ui_idle().unwrap().is_satisfied());
        }

        #[test]
        fn test_zero_counts_are_noop() {
            let d = dispatcher();
            let outcome = d
                .wait_for_ui_events(0, Duration::ZERO, 0, Duration::from_millis(1))
                .unwrap();
            assert!(outcome.is_satisfied());
        }

        #[test]
        fn test_wait_for_ui_condition() {
            let d = dispatcher();
            let mut turns = 0;
            let outcome = d
                .wait_for_ui_condition(JOIN, move || {
                    turns += 1;
                    turns == 3
                })
                .unwrap();
            assert!(outcome.is_satisfied());
        }

        #[test]
        fn test_ui_waits_from_loop_are_programming_errors() {
            let d = dispatcher();
            let inner = d.clone();
            let handle = d
                .run_on_ui_thread(move || {
                    Ok::<_, DivideByZero>((
                        inner.wait_for_ui_idle().map_err(|e| e.is_programming()),
                        inner
                            .wait_for_ui_condition(JOIN, || true)
                            .map_err(|e| e.is_programming()),
                    ))
                })
                .unwrap();
            let (idle, condition) = d.wait_for(&handle, JOIN).unwrap();
            assert_eq!(idle, Err(true));
            assert_eq!(condition, Err(true));
        }
    }

    mod profile_tests {
        use super::*;

        #[test]
        fn test_switching_profile_shares_registry() {
            let d = dispatcher();
            let fast = d.use_aggressive_timing();
            assert_eq!(fast.timing().attempts, 2);
            assert_eq!(d.timing().attempts, 5);
            assert!(Arc::ptr_eq(d.registry(), fast.registry()));
            assert_eq!(d.use_debug_timing().timing().pulses, 5);
            assert_eq!(fast.use_default_timing().timing(), &TimingProfile::default());
        }

        #[test]
        fn test_from_config_applies_flags() {
            let registry = Arc::new(FailureRegistry::new());
            let config = DispatcherConfig::default()
                .with_auto_check_failures(false)
                .with_print_failures_on_occurrence(false)
                .with_profile(crate::timing::ProfileName::Debug);
            let d = Dispatcher::from_config_with_registry(
                &config,
                Arc::new(EventLoop::spawn().unwrap()),
                registry,
            );
            assert!(!d.auto_check_failures());
            assert!(!d.print_failures_on_occurrence());
            assert!(!d.check_all_thread_failures());
            assert!(d.timing().trace_timing);
        }
    }

    mod pending_failure_tests {
        use super::*;

        #[test]
        fn test_check_pending_failure_drains_once() {
            let d = dispatcher();
            d.set_auto_check_failures(false);
            let _abandoned = d.run_async(|| Err::<(), _>(DivideByZero)).unwrap();
            d.wait_until(JOIN, || !d.registry().is_empty()).unwrap();
            let err = d.check_pending_failure().unwrap_err();
            assert!(err.failure().unwrap().downcast_ref::<DivideByZero>().is_some());
            assert!(d.check_pending_failure().is_ok());
        }

        #[test]
        fn test_clear_pending_failures() {
            let d = dispatcher();
            d.set_auto_check_failures(false);
            let _abandoned = d.run_async(|| Err::<(), _>(DivideByZero)).unwrap();
            d.wait_until(JOIN, || !d.registry().is_empty()).unwrap();
            d.clear_pending_failures();
            assert!(d.check_pending_failure().is_ok());
        }
    }
}
