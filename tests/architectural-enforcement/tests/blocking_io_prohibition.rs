//! Blocking I/O Prohibition
//!
//! Inside async functions, coordinator code uses `reqwest` and
//! `tokio::net` only. Synchronous config reads happen before the runtime
//! does any work and are allowed in plain functions.

use architectural_enforcement::{blocking_io_violations, coordinator_sources};

#[test]
fn test_no_blocking_io_in_async_code() {
    let sources = coordinator_sources();
    assert!(
        !sources.is_empty(),
        "no coordinator sources found; the scan paths are stale"
    );

    let violations: Vec<_> = sources.iter().flat_map(blocking_io_violations).collect();

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in coordinator code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse instead:");
        eprintln!("  - reqwest::Client for HTTP");
        eprintln!("  - tokio::net::lookup_host for DNS resolution");
        eprintln!("  - tokio::fs once inside the runtime");

        panic!("Found {} blocking I/O violation(s)", violations.len());
    }
}

#[test]
fn test_both_crates_are_scanned() {
    let sources = coordinator_sources();
    let scanned = |needle: &str| {
        sources
            .iter()
            .any(|file| file.path.to_string_lossy().contains(needle))
    };
    assert!(scanned("core/src"));
    assert!(scanned("daemon/src"));
}
