//! Example: UI Synchronization
//!
//! Demonstrates: background work, UI-loop dispatch, condition waits and
//! deferred failures
//!
//! Run with: `cargo run --example ui_sync_demo`
//!
//! Set `PROBAR_ASYNC_LOG=debug` and `PROBAR_ASYNC_PROFILE=debug` for timing traces.

use probar_async::diagnostics;
use probar_async::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("divide by zero")]
struct DivideByZero;

fn divide(a: i32, b: i32) -> Result<i32, DivideByZero> {
    if b == 0 {
        Err(DivideByZero)
    } else {
        Ok(a / b)
    }
}

fn main() -> AsyncResult<()> {
    diagnostics::install_subscriber("warn");
    println!("=== UI Synchronization Example ===\n");

    let config = DispatcherConfig::from_env()?.with_print_failures_on_occurrence(false);
    let ui = Arc::new(
        EventLoop::builder()
            .name("demo-ui-loop")
            .frame_interval(Duration::from_millis(16))
            .spawn()?,
    );
    let dispatcher = Dispatcher::from_config(&config, ui.clone());
    println!("Timing profile: {}", dispatcher.timing().name);

    demo_background_work(&dispatcher)?;
    demo_ui_dispatch(&dispatcher, &ui)?;
    demo_condition_wait(&dispatcher)?;
    demo_deferred_failure(&dispatcher)?;
    demo_observable(&dispatcher)?;

    println!("\n=== Example Complete ===");
    Ok(())
}

fn demo_background_work(dispatcher: &Dispatcher) -> AsyncResult<()> {
    println!("\n1. Background work...");
    let handle = dispatcher.run_async(|| divide(84, 2))?;
    println!("   84 / 2 = {}", dispatcher.wait(&handle)?);

    let handle = dispatcher.run_async_with(|| divide(1, 0), false)?;
    match dispatcher.wait(&handle) {
        Err(AsyncError::Execution(failure)) => {
            let original = failure.downcast_ref::<DivideByZero>().is_some();
            println!("   1 / 0 failed with '{failure}' (original cause kept: {original})");
        }
        other => println!("   unexpected: {other:?}"),
    }
    Ok(())
}

fn demo_ui_dispatch(dispatcher: &Dispatcher, ui: &EventLoop) -> AsyncResult<()> {
    println!("\n2. UI-loop dispatch...");
    let clicks = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let clicks = clicks.clone();
        dispatcher.run_on_ui_thread(move || {
            clicks.fetch_add(1, Ordering::SeqCst);
        })?;
    }
    dispatcher.wait_for_ui_idle()?;
    println!(
        "   {} clicks handled after {} loop turns and {} pulses",
        clicks.load(Ordering::SeqCst),
        ui.turn_count(),
        ui.pulse_count()
    );
    Ok(())
}

fn demo_condition_wait(dispatcher: &Dispatcher) -> AsyncResult<()> {
    println!("\n3. Condition evaluated on the UI loop...");
    let mut polls = 0;
    let outcome = dispatcher.wait_for_ui_condition(Duration::from_secs(1), move || {
        polls += 1;
        polls >= 4
    })?;
    println!("   outcome: {outcome:?}");

    let err = dispatcher
        .wait_for_ui_condition(Duration::from_millis(100), || false)
        .unwrap_err();
    println!("   never-true condition: {err}");
    Ok(())
}

fn demo_deferred_failure(dispatcher: &Dispatcher) -> AsyncResult<()> {
    println!("\n4. Deferred failure...");
    dispatcher.set_auto_check_failures(false);
    let _abandoned = dispatcher.run_async(|| divide(7, 0))?;
    match dispatcher.check_pending_failure() {
        Err(AsyncError::Execution(failure)) => {
            println!("   surfaced out of band: {failure}");
        }
        Err(other) => return Err(other),
        Ok(()) => println!("   nothing staged yet"),
    }
    dispatcher.check_pending_failure()?;
    println!("   second check is clean");
    dispatcher.set_auto_check_failures(true);
    Ok(())
}

fn demo_observable(dispatcher: &Dispatcher) -> AsyncResult<()> {
    println!("\n5. Observable value...");
    let ready = Arc::new(BoolProperty::new(false));
    let setter = ready.clone();
    dispatcher.run_on_ui_thread(move || setter.set(true))?;
    dispatcher.wait_for_value(Duration::from_secs(1), ready.as_ref())?;
    println!("   ready = {}", ready.get());
    Ok(())
}
