//! Probar Async: cross-thread synchronization for GUI tests
//!
//! Coordinates three execution contexts: the test thread, a background worker
//! pool, and a single-threaded UI loop owned by the toolkit. Test code submits
//! work to either context, joins it with bounded timeouts, and waits for
//! predicates evaluated on the UI loop. Failures raised on threads nobody
//! joins are staged in a registry so they are never silently lost.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐  run_async        ┌──────────────────┐
//! │  Test thread  │──────────────────►│   WorkerPool     │──┐
//! │               │  run_on_ui_thread ├──────────────────┤  │ failures
//! │  Dispatcher   │──────────────────►│   UiLoop         │──┤
//! │               │◄── TaskHandle ────┤                  │  ▼
//! │  ConditionWaiter ─ evaluate ─────►│                  │ FailureRegistry
//! └───────────────┘                   └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use probar_async::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let ui = Arc::new(EventLoop::spawn()?);
//! let dispatcher = Dispatcher::new(ui);
//!
//! let handle = dispatcher.run_async(|| Ok::<_, std::io::Error>(21 * 2))?;
//! assert_eq!(dispatcher.wait_for(&handle, Duration::from_secs(1))?, 42);
//!
//! dispatcher.wait_for_ui_idle()?;
//! dispatcher.check_pending_failure()?;
//! # Ok::<(), probar_async::AsyncError>(())
//! ```

#![warn(missing_docs)]

pub mod conditions;
pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod event_loop;
pub mod failure;
pub mod interrupt;
pub mod observable;
pub mod pool;
pub mod registry;
mod result;
pub mod task;
pub mod timing;
pub mod ui_loop;
pub mod waiter;

pub use conditions::{EventCounter, RenderPulseCounter, UiCondition};
pub use config::DispatcherConfig;
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use event_loop::{EventLoop, EventLoopBuilder};
pub use failure::{Failure, FailureKind};
pub use interrupt::{Interrupt, Interrupted};
pub use observable::{BoolProperty, ObservableBool};
pub use pool::{PoolConfig, WorkerPool};
pub use registry::{FailureRegistry, ThreadFailureHook};
pub use result::{AsyncError, AsyncResult, BoxError};
pub use task::{Task, TaskHandle, TaskId, TaskOutput, TaskState};
pub use timing::{ProfileName, TimingProfile};
pub use ui_loop::UiLoop;
pub use waiter::{ConditionWaiter, WaitHooks, WaitOutcome, WaiterState};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::conditions::*;
    pub use super::config::*;
    pub use super::dispatcher::*;
    pub use super::event_loop::*;
    pub use super::failure::*;
    pub use super::interrupt::*;
    pub use super::observable::*;
    pub use super::pool::{PoolConfig, WorkerPool};
    pub use super::registry::*;
    pub use super::result::*;
    pub use super::task::{Task, TaskHandle, TaskId, TaskOutput, TaskState};
    pub use super::timing::*;
    pub use super::ui_loop::*;
    pub use super::waiter::*;
}
