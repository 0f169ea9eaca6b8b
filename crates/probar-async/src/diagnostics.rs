//! Diagnostic output for failures and stalled waits.
//!
//! Everything here is side output: reports go to `tracing` under
//! [`TARGET`] and never change control flow.

use crate::failure::Failure;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt::Write as _;
use std::time::Duration;

/// Tracing target for all diagnostic events
pub const TARGET: &str = "probar_async::diagnostics";

/// Environment variable read by [`install_subscriber`]
pub const LOG_ENV: &str = "PROBAR_ASYNC_LOG";

/// Install a fmt subscriber filtered by `PROBAR_ASYNC_LOG`
///
/// Falls back to `default_filter` when the variable is unset or invalid.
/// Returns false if a global subscriber was already installed.
pub fn install_subscriber(default_filter: &str) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// Render the report printed when a failure is registered
#[must_use]
pub fn failure_report(failure: &Failure) -> String {
    let mut out = String::from("--- Failure in async thread ---\n");
    let _ = writeln!(out, "{failure}");
    if let Some(thread) = failure.thread_name() {
        let _ = writeln!(out, "\tthread: {thread}");
    }
    let mut source = failure.source();
    while let Some(cause) = source {
        let _ = writeln!(out, "caused by: {cause}");
        source = cause.source();
    }
    if let Some(origin) = failure.origin() {
        out.push_str("--- Trace of caller of unhandled failure in async thread ---\n");
        let _ = writeln!(out, "\tsubmitted at {origin}");
        if let Some(trace) = failure.submitted_from() {
            push_backtrace(&mut out, trace);
        }
    }
    out
}

/// Render the report emitted when a wait on the UI loop gives up
///
/// Names the loop thread and the elapsed time. The trace is the waiting
/// thread's own; the loop thread's stack cannot be captured from outside.
#[must_use]
pub fn stall_report(reason: &str, loop_thread: Option<&str>, elapsed: Duration) -> String {
    let mut out = format!("Stalled UI wait at {reason}\n");
    let _ = writeln!(
        out,
        "----- Thread info {} -----",
        loop_thread.unwrap_or("<unnamed UI loop>")
    );
    let _ = writeln!(out, "elapsed: {}ms", elapsed.as_millis());
    let waiting = std::thread::current();
    let _ = writeln!(
        out,
        "waiting thread: {}",
        waiting.name().unwrap_or("<unnamed>")
    );
    push_backtrace(&mut out, &Backtrace::capture());
    out
}

fn push_backtrace(out: &mut String, trace: &Backtrace) {
    if trace.status() == BacktraceStatus::Captured {
        for line in trace.to_string().lines() {
            let _ = writeln!(out, "\t{line}");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::result::BoxError;
    use std::panic::Location;

    #[derive(Debug, thiserror::Error)]
    #[error("disk on fire")]
    struct DiskOnFire;

    #[test]
    fn test_failure_report_lists_cause_chain() {
        let failure = Failure::error(Box::new(DiskOnFire) as BoxError);
        let report = failure_report(&failure);
        assert!(report.starts_with("--- Failure in async thread ---"));
        assert!(report.contains("error: disk on fire"));
        assert!(report.contains("caused by: disk on fire"));
    }

    #[test]
    fn test_failure_report_includes_origin() {
        let failure = Failure::msg("x").with_origin(Location::caller(), None);
        let report = failure_report(&failure);
        assert!(report.contains("Trace of caller"));
        assert!(report.contains("diagnostics.rs"));
    }

    #[test]
    fn test_failure_report_without_origin() {
        let report = failure_report(&Failure::msg("x"));
        assert!(!report.contains("Trace of caller"));
    }

    #[test]
    fn test_stall_report_names_loop_thread() {
        let report = stall_report("timeout", Some("probar-ui-loop"), Duration::from_millis(42));
        assert!(report.starts_with("Stalled UI wait at timeout"));
        assert!(report.contains("probar-ui-loop"));
        assert!(report.contains("42ms"));
    }

    #[test]
    fn test_stall_report_names_waiting_thread() {
        let report = std::thread::Builder::new()
            .name("test-waiter".to_string())
            .spawn(|| stall_report("interruption", None, Duration::ZERO))
            .unwrap()
            .join()
            .unwrap();
        assert!(report.contains("<unnamed UI loop>"));
        assert!(report.contains("waiting thread: test-waiter"));
    }
}
