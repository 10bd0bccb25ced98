//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async code in the feed crates MUST NOT use blocking I/O.
//! **Required**: Use `reqwest` async clients, `tokio::fs`, `tokio::net`, not
//! `std::fs`, `std::net` or `reqwest::blocking` inside `async fn`.
//!
//! Synchronous helpers (configuration loading before the feed starts) may
//! read files directly.

use std::path::Path;

use architectural_enforcement::{code_part, production_lines, rust_sources, PRODUCTION_DIRS};

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in async code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n❌ FORBIDDEN blocking I/O in async fn:");
        eprintln!("  - std::fs::read(), std::fs::write(), std::fs::File");
        eprintln!("  - std::net::TcpStream, std::net::TcpListener");
        eprintln!("  - std::process::Command::output()");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("\n✅ ACCEPTABLE blocking I/O:");
        eprintln!("  - Non-async functions (configuration loading)");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) in async code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all blocking I/O calls inside async functions
fn find_blocking_io_violations() -> Vec<String> {
    let mut violations = Vec::new();
    for dir in PRODUCTION_DIRS {
        for path in rust_sources(dir) {
            check_file(&path, &mut violations);
        }
    }
    violations
}

const FORBIDDEN: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
];

fn check_file(path: &Path, violations: &mut Vec<String>) {
    let Some(lines) = production_lines(path) else {
        return;
    };
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);
        if !is_in_async_function(&lines, idx) {
            continue;
        }
        for (pattern, kind) in FORBIDDEN {
            if code.contains(pattern) {
                violations.push(format!(
                    "{}:{} - {kind}: {}",
                    path.display(),
                    idx + 1,
                    line.trim()
                ));
            }
        }
    }
}

/// Check if the nearest enclosing function above this line is `async`
fn is_in_async_function(lines: &[&str], current_idx: usize) -> bool {
    for line in lines[..=current_idx].iter().rev() {
        let code = code_part(line).trim_start();
        let code = code.strip_prefix("pub ").unwrap_or(code);
        let code = code.strip_prefix("pub(crate) ").unwrap_or(code);

        if code.starts_with("async fn ") {
            return true;
        }
        if code.starts_with("fn ") {
            return false;
        }
    }
    false
}

#[test]
fn test_async_function_detection() {
    let code = [
        "fn load(path: &Path) -> String {",
        "    std::fs::read_to_string(path).unwrap_or_default()",
        "}",
        "",
        "pub async fn fetch(path: &Path) -> String {",
        "    std::fs::read_to_string(path).unwrap_or_default()",
        "}",
    ];
    assert!(!is_in_async_function(&code, 1));
    assert!(is_in_async_function(&code, 5));
}
