//! Observable booleans
//!
//! The minimal shape `wait_for_value` needs: read the current value and be
//! told when it changes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Callback invoked with the new value after every change
pub type ChangeListener = Arc<dyn Fn(bool) + Send + Sync + 'static>;

/// Registration handle for a change listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// A boolean value that notifies listeners when it changes
pub trait ObservableBool: Send + Sync {
    /// Current value
    fn get(&self) -> bool;

    /// Subscribe to changes
    fn add_listener(&self, listener: ChangeListener) -> ListenerId;

    /// Unsubscribe
    fn remove_listener(&self, id: ListenerId);
}

/// Thread-safe boolean property
pub struct BoolProperty {
    value: Mutex<bool>,
    listeners: Mutex<Vec<(ListenerId, ChangeListener)>>,
    next_id: AtomicU64,
}

impl fmt::Debug for BoolProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoolProperty")
            .field("value", &self.get())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl Default for BoolProperty {
    fn default() -> Self {
        Self::new(false)
    }
}

impl BoolProperty {
    /// Create a property with an initial value
    #[must_use]
    pub fn new(initial: bool) -> Self {
        Self {
            value: Mutex::new(initial),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Set the value, notifying listeners if it changed
    pub fn set(&self, value: bool) {
        {
            let mut current = self.value.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == value {
                return;
            }
            *current = value;
        }
        let listeners: Vec<ChangeListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(value);
        }
    }

    /// Number of subscribed listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ObservableBool for BoolProperty {
    fn get(&self) -> bool {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add_listener(&self, listener: ChangeListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_set_notifies_on_change_only() {
        let prop = BoolProperty::new(false);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        prop.add_listener(Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        prop.set(false);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        prop.set(true);
        prop.set(true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(prop.get());
    }

    #[test]
    fn test_listener_receives_new_value() {
        let prop = BoolProperty::default();
        let last = Arc::new(Mutex::new(None));
        let sink = last.clone();
        prop.add_listener(Arc::new(move |value| {
            *sink.lock().unwrap() = Some(value);
        }));
        prop.set(true);
        assert_eq!(*last.lock().unwrap(), Some(true));
        prop.set(false);
        assert_eq!(*last.lock().unwrap(), Some(false));
    }

    #[test]
    fn test_remove_listener() {
        let prop = BoolProperty::default();
        let id = prop.add_listener(Arc::new(|_| panic!("should be removed")));
        assert_eq!(prop.listener_count(), 1);
        prop.remove_listener(id);
        assert_eq!(prop.listener_count(), 0);
        prop.set(true);
    }
}
