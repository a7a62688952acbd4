/*!
 * Flare Panic Hook: automatic panic capture.
 *
 * `install(client)` registers a `std::panic::set_hook` handler. When a panic
 * occurs, it:
 *
 * 1. Extracts the panic message, source location, and thread name.
 * 2. Captures a backtrace at the panic site.
 * 3. Submits an `ErrorInput` with `error_type = "panic"` through the client.
 * 4. Calls the previous panic hook, so the default stderr output is kept.
 *
 * # Recursion safety
 *
 * A `thread_local` flag stops the hook from re-entering itself if building
 * or enqueueing the report panics.
 */

use std::cell::Cell;
use std::panic;
use std::panic::PanicHookInfo;
use std::sync::atomic::{AtomicBool, Ordering};

use flare_core::protocol::stack;
use flare_core::{Client, ErrorInput};
use serde_json::json;

/// Error type attached to every panic report.
pub const PANIC_ERROR_TYPE: &str = "panic";

static INSTALLED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/**
 * Installs the panic hook, reporting through `client`.
 *
 * Idempotent: only the first call installs a hook, so one panic never
 * produces duplicate reports.
 */
pub fn install(client: Client) {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }

    let previous_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        let is_recursive = IN_HOOK.with(|flag| flag.replace(true));

        if !is_recursive {
            let _ = panic::catch_unwind(panic::AssertUnwindSafe(|| {
                client.capture(panic_input(info));
            }));
            IN_HOOK.with(|flag| flag.set(false));
        }

        previous_hook(info);
    }));
}

/// Whether `install` has already run in this process.
pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::SeqCst)
}

// ---------------------------------------------------------------------------
// Internal: build the panic report
// ---------------------------------------------------------------------------

fn panic_input(info: &PanicHookInfo) -> ErrorInput {
    let message = payload_message(info.payload());
    let thread_name = std::thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string();

    let mut input = ErrorInput::new(PANIC_ERROR_TYPE, message)
        .with_custom_data("thread", json!(thread_name));

    if let Some(loc) = info.location() {
        input = input
            .with_custom_data("panic_file", json!(loc.file()))
            .with_custom_data("panic_line", json!(loc.line()))
            /* the same message from two call sites is two problems */
            .with_fingerprint_extra(format!("{}:{}", loc.file(), loc.line()));
    }

    match stack::capture() {
        Some(trace) => input.with_stack_trace(trace),
        None => input,
    }
}

fn payload_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<unknown panic>".to_string()
    }
}
