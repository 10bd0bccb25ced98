//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the feed crates:
//! - No sleep() calls in production code outside reconnect backoff
//! - No blocking I/O inside async functions
//!
//! The helpers here locate the workspace sources and strip test code, so each
//! check only sees what ships.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories checked by every rule, relative to the
/// workspace root
pub const PRODUCTION_DIRS: &[&str] = &["feed/core/src", "feed/watch/src"];

/// Workspace root (two levels above this package)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// All Rust files under `dir` (relative to the workspace root)
#[must_use]
pub fn rust_sources(dir: &str) -> Vec<PathBuf> {
    let root = workspace_root().join(dir);
    if !root.exists() {
        return Vec::new();
    }

    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Lines of `path` up to its `#[cfg(test)]` module, or `None` if unreadable
#[must_use]
pub fn production_lines(path: &Path) -> Option<Vec<String>> {
    let content = fs::read_to_string(path).ok()?;
    Some(strip_test_module(&content))
}

/// Lines of `content` before the first `#[cfg(test)]` attribute
#[must_use]
pub fn strip_test_module(content: &str) -> Vec<String> {
    content
        .lines()
        .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(str::to_string)
        .collect()
}

/// The code part of a line, without any trailing `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_root_contains_feed_crates() {
        let root = workspace_root();
        assert!(root.join("Cargo.toml").exists());
        for dir in PRODUCTION_DIRS {
            assert!(!rust_sources(dir).is_empty(), "no sources under {dir}");
        }
    }

    #[test]
    fn test_strip_test_module() {
        let content = "fn a() {}\n\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        assert_eq!(strip_test_module(content), vec!["fn a() {}", ""]);
    }

    #[test]
    fn test_code_part() {
        assert_eq!(code_part("let x = 1; // sleep(1)"), "let x = 1; ");
        assert_eq!(code_part("let y = 2;"), "let y = 2;");
    }
}
