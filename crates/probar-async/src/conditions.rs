//! Stock Conditions
//!
//! Predicates evaluated on the UI loop by the condition waiter. Both stock
//! counters are quiescence heuristics, not guarantees: work that keeps
//! re-posting itself to the loop can outlast the counted turns unnoticed.

use crate::ui_loop::{PulseListenerId, UiLoop};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A predicate evaluated on the UI loop
pub trait UiCondition: Send {
    /// Evaluate once; called on the UI loop thread
    fn evaluate(&mut self) -> bool;

    /// Short description used in timeout diagnostics
    fn describe(&self) -> String {
        "custom condition".to_string()
    }
}

impl<F> UiCondition for F
where
    F: FnMut() -> bool + Send,
{
    fn evaluate(&mut self) -> bool {
        self()
    }
}

/// Satisfied once `n` evaluations (UI-loop turns) have passed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCounter {
    remaining: u32,
}

impl EventCounter {
    /// Count down from `n`
    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self { remaining: n }
    }

    /// Evaluations still needed
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl UiCondition for EventCounter {
    fn evaluate(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0
    }

    fn describe(&self) -> String {
        format!("event counter ({} turns remaining)", self.remaining)
    }
}

/// Satisfied once `n` render pulses have been observed
///
/// Subscribes to the loop's pulses on creation and unsubscribes on drop. A
/// loop without pulse support has every evaluation count as one pulse.
pub struct RenderPulseCounter {
    ui: Arc<dyn UiLoop>,
    remaining: Arc<AtomicU32>,
    listener: Option<PulseListenerId>,
}

impl fmt::Debug for RenderPulseCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPulseCounter")
            .field("remaining", &self.remaining())
            .field("driven_by_pulses", &self.listener.is_some())
            .finish()
    }
}

impl RenderPulseCounter {
    /// Count down `n` pulses of `ui`
    #[must_use]
    pub fn new(ui: Arc<dyn UiLoop>, n: u32) -> Self {
        let remaining = Arc::new(AtomicU32::new(n));
        let counter = remaining.clone();
        let listener = ui.add_pulse_listener(Arc::new(move || {
            let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            });
        }));
        Self {
            ui,
            remaining,
            listener,
        }
    }

    /// Pulses still needed
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }
}

impl UiCondition for RenderPulseCounter {
    fn evaluate(&mut self) -> bool {
        if self.listener.is_none() {
            let left = self.remaining().saturating_sub(1);
            self.remaining.store(left, Ordering::SeqCst);
            return left == 0;
        }
        if self.remaining() == 0 {
            return true;
        }
        self.ui.request_pulse();
        false
    }

    fn describe(&self) -> String {
        format!("render pulse counter ({} pulses remaining)", self.remaining())
    }
}

impl Drop for RenderPulseCounter {
    fn drop(&mut self) {
        if let Some(id) = self.listener.take() {
            self.ui.remove_pulse_listener(id);
        }
    }
}
