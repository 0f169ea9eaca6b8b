//! Failures captured from work that ran on another thread.
//!
//! A [`Failure`] is the uniform element type of the failure registry. Every
//! error or panic observed by a task wrapper is normalised into one:
//!
//! - panics are the fatal category and keep their payload message
//! - an `AsyncError::Execution` returned by the work is a dispatch artifact and
//!   is unwrapped exactly one level
//! - a bare `Failure` passes through unchanged
//! - anything else is wrapped as a generic runtime failure keeping the error
//!   as its cause

use crate::result::{AsyncError, BoxError};
use std::any::Any;
use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Category of a captured failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The work panicked
    Panic,
    /// The work returned an error
    Error,
}

impl FailureKind {
    /// Get the kind name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Panic => "panic",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
struct FailureInner {
    kind: FailureKind,
    message: String,
    cause: Option<Arc<dyn Error + Send + Sync>>,
    origin: Option<&'static Location<'static>>,
    thread: Option<String>,
    submitted_from: Option<Arc<Backtrace>>,
}

/// A failure raised by a unit of work, plus where it came from
#[derive(Debug, Clone)]
pub struct Failure {
    inner: Arc<FailureInner>,
    delayed: bool,
}

impl Failure {
    /// Wrap an error as a generic runtime failure
    #[must_use]
    pub fn error(cause: BoxError) -> Self {
        let message = cause.to_string();
        Self::build(FailureKind::Error, message, Some(Arc::from(cause)))
    }

    /// A failure with a message and no underlying cause
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::build(FailureKind::Error, message.into(), None)
    }

    /// Build a failure from a panic payload
    #[must_use]
    pub fn panic(payload: &(dyn Any + Send)) -> Self {
        Self::build(FailureKind::Panic, panic_message(payload), None)
    }

    /// Normalise an error returned by a unit of work
    #[must_use]
    pub fn from_box_error(err: BoxError) -> Self {
        let err = match err.downcast::<AsyncError>() {
            Ok(async_err) => match *async_err {
                AsyncError::Execution(inner) => return inner,
                other => Box::new(other) as BoxError,
            },
            Err(err) => err,
        };
        match err.downcast::<Self>() {
            Ok(failure) => *failure,
            Err(err) => Self::error(err),
        }
    }

    fn build(
        kind: FailureKind,
        message: String,
        cause: Option<Arc<dyn Error + Send + Sync>>,
    ) -> Self {
        Self {
            inner: Arc::new(FailureInner {
                kind,
                message,
                cause,
                origin: None,
                thread: std::thread::current().name().map(str::to_string),
                submitted_from: None,
            }),
            delayed: false,
        }
    }

    /// Attach the call site that submitted the failing work
    #[must_use]
    pub(crate) fn with_origin(
        self,
        origin: &'static Location<'static>,
        submitted_from: Option<Arc<Backtrace>>,
    ) -> Self {
        if self.inner.origin.is_some() {
            return self;
        }
        let inner = &self.inner;
        Self {
            inner: Arc::new(FailureInner {
                kind: inner.kind,
                message: inner.message.clone(),
                cause: inner.cause.clone(),
                origin: Some(origin),
                thread: inner.thread.clone(),
                submitted_from,
            }),
            delayed: self.delayed,
        }
    }

    /// Mark as re-surfaced from the registry rather than observed directly
    #[must_use]
    pub(crate) fn into_delayed(mut self) -> Self {
        self.delayed = true;
        self
    }

    /// Failure category
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.inner.kind
    }

    /// Failure message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// Check if the work panicked
    #[must_use]
    pub fn is_panic(&self) -> bool {
        self.inner.kind == FailureKind::Panic
    }

    /// Check if this failure was re-surfaced out of band
    #[must_use]
    pub const fn is_delayed(&self) -> bool {
        self.delayed
    }

    /// Call site that submitted the failing work
    #[must_use]
    pub fn origin(&self) -> Option<&'static Location<'static>> {
        self.inner.origin
    }

    /// Name of the thread the failure occurred on
    #[must_use]
    pub fn thread_name(&self) -> Option<&str> {
        self.inner.thread.as_deref()
    }

    /// Trace of the caller that submitted the failing work
    #[must_use]
    pub fn submitted_from(&self) -> Option<&Backtrace> {
        self.inner.submitted_from.as_deref()
    }

    /// The original error, if the work returned one
    #[must_use]
    pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.inner.cause.as_deref()
    }

    /// Downcast the original error
    #[must_use]
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.cause().and_then(|cause| cause.downcast_ref::<E>())
    }

    /// Two handles to the same captured failure
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.delayed {
            write!(f, "[delayed] ")?;
        }
        write!(f, "{}: {}", self.inner.kind, self.inner.message)
    }
}

impl Error for Failure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner
            .cause
            .as_deref()
            .map(|cause| cause as &(dyn Error + 'static))
    }
}

/// Extract a readable message from a panic payload
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}
