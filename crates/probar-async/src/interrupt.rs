//! Interruption of waiting threads.
//!
//! Rust threads cannot be interrupted from outside, so waits that should be
//! abortable take an [`Interrupt`] token. Interrupting a wait is a soft abort:
//! the wait returns early and reports it, it never raises an error.
//!
//! Reporting an interruption consumes it: only the wait that observed it
//! aborts, and later waits on the same token run normally.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Marker returned when a sleep was cut short
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

#[derive(Debug, Default)]
struct State {
    flag: Mutex<bool>,
    wake: Condvar,
}

/// Shared, cloneable interruption token
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    state: Arc<State>,
}

impl Interrupt {
    /// Create a token that is not interrupted
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request interruption and wake every sleeper
    pub fn interrupt(&self) {
        *self.state.flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.state.wake.notify_all();
    }

    /// Check if interruption was requested
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        *self.state.flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear a previous interruption request
    pub fn reset(&self) {
        *self.state.flag.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    /// Check and clear the interruption request in one step
    #[must_use]
    pub fn take(&self) -> bool {
        std::mem::take(&mut *self.state.flag.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Sleep for `duration` unless interrupted first
    ///
    /// # Errors
    ///
    /// Returns `Interrupted` if the token was or becomes interrupted; the
    /// request is cleared when reported
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let deadline = Instant::now() + duration;
        let mut flag = self.state.flag.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if std::mem::take(&mut *flag) {
                return Err(Interrupted);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            flag = self
                .state
                .wake
                .wait_timeout(flag, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
