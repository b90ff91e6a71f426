//! Sleep Prohibition
//!
//! Coordinator code never sleeps. Readiness waits ride the availability
//! gate's watch channel, periodic work uses `tokio::time::interval`, and
//! tests advance a paused tokio clock.

use architectural_enforcement::{coordinator_sources, sleep_violations};

#[test]
fn test_no_sleep_in_coordinator_code() {
    let sources = coordinator_sources();
    assert!(
        !sources.is_empty(),
        "no coordinator sources found; the scan paths are stale"
    );

    let violations: Vec<_> = sources.iter().flat_map(sleep_violations).collect();

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in coordinator code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nAllowed instead:");
        eprintln!("  - waiting on a watch channel with tokio::time::timeout");
        eprintln!("  - tokio::time::interval for periodic tasks");
        eprintln!("  - #[tokio::test(start_paused = true)] with tokio::time::advance in tests");

        panic!("Found {} sleep violation(s)", violations.len());
    }
}
