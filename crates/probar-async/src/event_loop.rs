//! Reference UI loop
//!
//! A toolkit-agnostic single-threaded event loop: one named thread draining a
//! FIFO of posted work. Render pulses are emitted on request and, when a frame
//! interval is configured, whenever a frame deadline passes.
//!
//! Panics inside posted work are contained so the loop keeps turning; the
//! panic hook still observes them.

use crate::diagnostics;
use crate::failure::panic_message;
use crate::result::AsyncResult;
use crate::ui_loop::{LoopTask, PulseListener, PulseListenerId, UiLoop};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Default name of the loop thread
pub const DEFAULT_LOOP_THREAD_NAME: &str = "probar-ui-loop";

enum Message {
    Run(LoopTask),
    Pulse,
    Shutdown,
}

struct Shared {
    sender: Sender<Message>,
    thread_id: OnceLock<ThreadId>,
    thread_name: String,
    listeners: Mutex<Vec<(PulseListenerId, PulseListener)>>,
    next_listener: AtomicU64,
    pulses: AtomicU64,
    turns: AtomicU64,
}

impl Shared {
    fn run_task(&self, task: LoopTask) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
            tracing::error!(
                target: diagnostics::TARGET,
                thread = %self.thread_name,
                "work posted to the UI loop panicked: {}",
                panic_message(payload.as_ref())
            );
        }
        self.turns.fetch_add(1, Ordering::SeqCst);
    }

    fn pulse(&self) {
        self.pulses.fetch_add(1, Ordering::SeqCst);
        let listeners: Vec<PulseListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

/// Builder for [`EventLoop`]
#[derive(Debug, Clone)]
pub struct EventLoopBuilder {
    name: String,
    frame_interval: Option<Duration>,
}

impl Default for EventLoopBuilder {
    fn default() -> Self {
        Self {
            name: DEFAULT_LOOP_THREAD_NAME.to_string(),
            frame_interval: None,
        }
    }
}

impl EventLoopBuilder {
    /// Set the loop thread name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Emit a pulse whenever this much time passes without one
    #[must_use]
    pub const fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Start the loop thread
    ///
    /// # Errors
    ///
    /// Returns error if the OS refuses to spawn the thread
    pub fn spawn(self) -> AsyncResult<EventLoop> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            sender,
            thread_id: OnceLock::new(),
            thread_name: self.name.clone(),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            pulses: AtomicU64::new(0),
            turns: AtomicU64::new(0),
        });
        let loop_shared = shared.clone();
        let frame_interval = self.frame_interval;
        let join = thread::Builder::new()
            .name(self.name)
            .spawn(move || run(&loop_shared, &receiver, frame_interval))?;
        let _ = shared.thread_id.set(join.thread().id());
        tracing::debug!(target: diagnostics::TARGET, thread = %shared.thread_name, "UI loop started");
        Ok(EventLoop {
            shared,
            join: Mutex::new(Some(join)),
        })
    }
}

fn run(shared: &Shared, receiver: &Receiver<Message>, frame_interval: Option<Duration>) {
    let _ = shared.thread_id.set(thread::current().id());
    let mut next_frame = frame_interval.map(|interval| Instant::now() + interval);
    loop {
        let message = match next_frame {
            Some(deadline) => match receiver.recv_deadline(deadline) {
                Ok(message) => Some(message),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match receiver.recv() {
                Ok(message) => Some(message),
                Err(_) => break,
            },
        };
        match message {
            Some(Message::Run(task)) => shared.run_task(task),
            Some(Message::Pulse) => shared.pulse(),
            Some(Message::Shutdown) => break,
            None => {}
        }
        if let (Some(deadline), Some(interval)) = (next_frame, frame_interval) {
            if Instant::now() >= deadline {
                shared.pulse();
                next_frame = Some(Instant::now() + interval);
            }
        }
    }
    tracing::debug!(target: diagnostics::TARGET, thread = %shared.thread_name, "UI loop stopped");
}

/// A single-threaded event loop running on its own thread
pub struct EventLoop {
    shared: Arc<Shared>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("thread_name", &self.shared.thread_name)
            .field("turns", &self.turn_count())
            .field("pulses", &self.pulse_count())
            .finish()
    }
}

impl EventLoop {
    /// Create a builder
    #[must_use]
    pub fn builder() -> EventLoopBuilder {
        EventLoopBuilder::default()
    }

    /// Start a loop with default settings
    ///
    /// # Errors
    ///
    /// Returns error if the OS refuses to spawn the thread
    pub fn spawn() -> AsyncResult<Self> {
        EventLoopBuilder::default().spawn()
    }

    /// Number of posted tasks the loop has run
    #[must_use]
    pub fn turn_count(&self) -> u64 {
        self.shared.turns.load(Ordering::SeqCst)
    }

    /// Number of pulses the loop has emitted
    #[must_use]
    pub fn pulse_count(&self) -> u64 {
        self.shared.pulses.load(Ordering::SeqCst)
    }

    /// Stop the loop after the work already queued and wait for its thread
    ///
    /// Work posted afterwards is dropped without running.
    pub fn shutdown(&self) {
        let _ = self.shared.sender.send(Message::Shutdown);
        if self.is_loop_thread() {
            return;
        }
        let join = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = join {
            let _ = join.join();
        }
    }
}

impl UiLoop for EventLoop {
    fn is_loop_thread(&self) -> bool {
        self.shared.thread_id.get() == Some(&thread::current().id())
    }

    fn post(&self, task: LoopTask) {
        if self.shared.sender.send(Message::Run(task)).is_err() {
            tracing::warn!(
                target: diagnostics::TARGET,
                thread = %self.shared.thread_name,
                "UI loop is gone, dropping posted work"
            );
        }
    }

    fn thread_name(&self) -> Option<String> {
        Some(self.shared.thread_name.clone())
    }

    fn add_pulse_listener(&self, listener: PulseListener) -> Option<PulseListenerId> {
        let id = PulseListenerId(self.shared.next_listener.fetch_add(1, Ordering::SeqCst));
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        Some(id)
    }

    fn remove_pulse_listener(&self, id: PulseListenerId) {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }

    fn request_pulse(&self) {
        let _ = self.shared.sender.send(Message::Pulse);
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
