//! UI loop capability
//!
//! The single-threaded, externally owned event loop is opaque to this crate.
//! Anything that can tell whether the current thread is the loop thread and
//! can queue work for the loop's next turn satisfies [`UiLoop`].
//!
//! Work posted from one thread must run in submission order.

use std::fmt;
use std::sync::Arc;

/// Work queued for the UI loop
pub type LoopTask = Box<dyn FnOnce() + Send + 'static>;

/// Callback invoked on every render pulse
pub type PulseListener = Arc<dyn Fn() + Send + Sync + 'static>;

/// Registration handle for a pulse listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PulseListenerId(pub u64);

/// Minimal capability a toolkit event loop must provide
pub trait UiLoop: Send + Sync {
    /// Check if the calling thread is the loop thread
    fn is_loop_thread(&self) -> bool;

    /// Queue work for the loop's next turn
    fn post(&self, task: LoopTask);

    /// Name of the loop thread, for diagnostics
    fn thread_name(&self) -> Option<String> {
        None
    }

    /// Subscribe to render pulses; `None` when the loop does not render
    fn add_pulse_listener(&self, _listener: PulseListener) -> Option<PulseListenerId> {
        None
    }

    /// Unsubscribe a pulse listener
    fn remove_pulse_listener(&self, _id: PulseListenerId) {}

    /// Ask the loop to produce a pulse soon
    fn request_pulse(&self) {}
}

impl fmt::Debug for dyn UiLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiLoop")
            .field("thread_name", &self.thread_name())
            .finish_non_exhaustive()
    }
}

/// Run on the loop: in place when already there, otherwise queued
pub fn run_on_loop(ui: &dyn UiLoop, task: LoopTask) {
    if ui.is_loop_thread() {
        task();
    } else {
        ui.post(task);
    }
}
