//! Integration Test: Production Code Hygiene
//!
//! **Policy**: production code in `switchyard/core` and `switchyard/cli`
//! must not block the runtime or panic on recoverable errors.
//!
//! **Exceptions**: test modules, and `tokio::time::sleep` for retry backoff
//! in the dispatcher.

use std::path::Path;

use architectural_enforcement::{assert_no_violations, code_part, is_in_async_function, scan};

/// Files allowed to await a sleep (retry backoff)
const BACKOFF_FILES: &[&str] = &["routing/dispatcher.rs"];

fn is_backoff_file(path: &Path) -> bool {
    BACKOFF_FILES.iter().any(|f| path.ends_with(f))
}

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(|path, lines, idx| {
        let code = code_part(lines[idx].1);
        if code.contains("thread::sleep") {
            return Some("Thread sleep");
        }
        if code.contains("time::sleep") && !is_backoff_file(path) {
            return Some("Async sleep outside retry backoff");
        }
        None
    });

    assert_no_violations("No sleep in production code", &violations);
}

#[test]
fn test_no_unwrap_or_expect_in_production_code() {
    let violations = scan(|_, lines, idx| {
        let code = code_part(lines[idx].1);
        if code.contains(".unwrap()") {
            return Some("unwrap()");
        }
        if code.contains(".expect(") {
            return Some("expect()");
        }
        None
    });

    assert_no_violations("Propagate errors instead of panicking", &violations);
}

#[test]
fn test_no_blocking_io_in_async_functions() {
    let violations = scan(|_, lines, idx| {
        let code = code_part(lines[idx].1);
        let blocking = code.contains("std::fs::")
            || code.contains("std::net::")
            || code.contains("std::process::Command")
            || code.contains("std::io::stdin()");
        (blocking && is_in_async_function(lines, idx)).then_some("Blocking I/O in async fn")
    });

    assert_no_violations("All I/O inside async functions must be async", &violations);
}

#[test]
fn test_core_does_not_install_a_subscriber() {
    let violations = scan(|path, lines, idx| {
        let in_core = path.to_string_lossy().contains("switchyard/core/");
        (in_core && code_part(lines[idx].1).contains("tracing_subscriber"))
            .then_some("Subscriber setup in library code")
    });

    assert_no_violations("Only binaries configure logging", &violations);
}
