//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the feed crates MUST NOT call sleep methods.
//! **Exceptions**: Reconnect backoff waits, periodic tasks driven by
//! `tokio::time::interval`, test code.
//!
//! Waiting for data is done on I/O and channels; a sleep in a polling loop
//! hides latency and burns wakeups.

use std::path::Path;

use architectural_enforcement::{code_part, production_lines, rust_sources, PRODUCTION_DIRS};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Backoff between reconnect attempts");
        eprintln!("  - Test code (#[cfg(test)] modules, tests/ directories)");
        eprintln!("  - Periodic tasks using tokio::time::interval()");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as poor man's synchronization");
        eprintln!("  - Sleep to 'wait' for events (use async I/O or watch channels!)");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all sleep() calls in production code
fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();
    for dir in PRODUCTION_DIRS {
        for path in rust_sources(dir) {
            check_file(&path, &mut violations);
        }
    }
    violations
}

fn check_file(path: &Path, violations: &mut Vec<String>) {
    let Some(lines) = production_lines(path) else {
        return;
    };
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);
        if !(code.contains("::sleep(") || code.contains(".sleep(")) {
            continue;
        }

        if is_backoff_context(&lines, idx) || is_interval_pattern(&lines, idx) {
            continue;
        }

        violations.push(format!("{}:{} - {}", path.display(), idx + 1, line.trim()));
    }
}

/// Check if sleep waits out a reconnect backoff
///
/// The delay may be fixed or computed; what matters is that the enclosing
/// code is about retrying.
fn is_backoff_context(lines: &[&str], current_idx: usize) -> bool {
    let context_range = current_idx.saturating_sub(15)..std::cmp::min(current_idx + 5, lines.len());

    lines[context_range].iter().any(|line| {
        let line = line.to_lowercase();
        line.contains("retry")
            || line.contains("reconnect")
            || line.contains("backoff")
            || line.contains("attempt")
    })
}

/// Check if this is the `tokio::time::interval` pattern (acceptable for periodic tasks)
fn is_interval_pattern(lines: &[&str], current_idx: usize) -> bool {
    let context_range = current_idx.saturating_sub(20)..current_idx;
    if lines[context_range]
        .iter()
        .any(|line| line.contains("ticker.tick()") || line.contains("tokio::time::interval"))
    {
        return true;
    }

    let forward_range = current_idx..std::cmp::min(current_idx + 5, lines.len());
    lines[forward_range]
        .iter()
        .any(|line| line.contains("ticker.tick()"))
}

#[test]
fn test_polling_sleep_is_detected() {
    let code = [
        "fn wait_for_data(&self) {",
        "    while self.is_empty() {",
        "        tokio::time::sleep(Duration::from_millis(10)).await;",
        "    }",
        "}",
    ];
    assert!(!is_backoff_context(&code, 2));
    assert!(!is_interval_pattern(&code, 2));
}

#[test]
fn test_backoff_detection() {
    let code = [
        "/// Sleep for the reconnect backoff unless cancelled first",
        "async fn wait_before_retry(backoff: Duration, cancel: &CancellationToken) -> bool {",
        "    tokio::select! {",
        "        () = cancel.cancelled() => false,",
        "        () = tokio::time::sleep(backoff) => true,",
        "    }",
        "}",
    ];
    assert!(is_backoff_context(&code, 4), "Should detect reconnect backoff");
}
