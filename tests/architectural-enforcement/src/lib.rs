//! Architectural Enforcement
//!
//! Source scanners shared by the enforcement tests in `tests/`:
//! - no sleeping in coordinator code; waits are driven by I/O, watch
//!   channels or `tokio::time::interval`
//! - no blocking sockets or blocking HTTP inside async functions
//!
//! The scanners are line-based on purpose. They read source text, strip
//! trailing `//` comments and look for forbidden call shapes.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Source directories of the coordinator crates, relative to this package
pub const SOURCE_DIRS: &[&str] = &["../../coordinator/core/src", "../../coordinator/daemon/src"];

/// One rule violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What was found
    pub kind: &'static str,
    /// Offending source line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.kind,
            self.text
        )
    }
}

/// A Rust source file loaded for scanning
#[derive(Debug)]
pub struct SourceFile {
    /// Path on disk
    pub path: PathBuf,
    /// Raw lines
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Build from in-memory text (used by the scanner self-tests)
    pub fn from_text(path: &str, text: &str) -> Self {
        Self {
            path: PathBuf::from(path),
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// Whether the whole file is test-only (`test_utils.rs` is `#[cfg(test)]`)
    pub fn is_test_support(&self) -> bool {
        self.path.file_name().and_then(|n| n.to_str()) == Some("test_utils.rs")
    }

    /// Index of the first line of the trailing `#[cfg(test)] mod` block
    pub fn test_section_start(&self) -> Option<usize> {
        self.lines.iter().enumerate().find_map(|(idx, line)| {
            let next = self.lines.get(idx + 1).map(|l| l.trim());
            (line.trim() == "#[cfg(test)]" && next.is_some_and(|n| n.starts_with("mod ")))
                .then_some(idx)
        })
    }

    /// Whether `idx` sits in test code
    pub fn is_test_line(&self, idx: usize) -> bool {
        self.is_test_support() || self.test_section_start().is_some_and(|start| idx >= start)
    }

    /// Signature line of the function enclosing `idx`, if any
    pub fn enclosing_fn(&self, idx: usize) -> Option<&str> {
        for i in (0..=idx.min(self.lines.len().saturating_sub(1))).rev() {
            let line = self.lines[i].trim();
            if line.starts_with("fn ") || line.contains(" fn ") {
                return Some(line);
            }
            if line.starts_with("mod ") || (line.starts_with("impl") && line.ends_with('{')) {
                return None;
            }
        }
        None
    }

    /// Whether `idx` sits inside an `async fn`
    pub fn is_in_async_fn(&self, idx: usize) -> bool {
        self.enclosing_fn(idx)
            .is_some_and(|signature| signature.contains("async fn "))
    }
}

/// Strip a trailing `//` comment
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Load every `.rs` file under `dir`; a missing directory yields nothing
pub fn rust_sources(dir: &Path) -> Vec<SourceFile> {
    if !dir.exists() {
        return Vec::new();
    }

    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .filter_map(|entry| {
            let text = fs::read_to_string(entry.path()).ok()?;
            Some(SourceFile {
                path: entry.path().to_path_buf(),
                lines: text.lines().map(str::to_string).collect(),
            })
        })
        .collect()
}

/// Load the coordinator crates' sources
pub fn coordinator_sources() -> Vec<SourceFile> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    SOURCE_DIRS
        .iter()
        .flat_map(|dir| rust_sources(&root.join(dir)))
        .collect()
}

// ============================================================================
// Sleep
// ============================================================================

/// Whether the line calls a sleep function
pub fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
}

/// Whether `idx` is part of an interval-driven loop
pub fn is_interval_pattern(file: &SourceFile, idx: usize) -> bool {
    let start = idx.saturating_sub(20);
    let end = (idx + 5).min(file.lines.len());
    file.lines[start..end]
        .iter()
        .any(|line| line.contains("interval.tick()") || line.contains("tokio::time::interval"))
}

/// Sleep calls anywhere in `file`, test modules included
///
/// Tests advance a paused tokio clock instead of sleeping.
pub fn sleep_violations(file: &SourceFile) -> Vec<Violation> {
    file.lines
        .iter()
        .enumerate()
        .filter(|(idx, line)| is_sleep_call(code_part(line)) && !is_interval_pattern(file, *idx))
        .map(|(idx, line)| Violation {
            path: file.path.clone(),
            line: idx + 1,
            kind: "sleep",
            text: line.trim().to_string(),
        })
        .collect()
}

// ============================================================================
// Blocking I/O
// ============================================================================

/// Blocking call shapes and what they are
///
/// `std::net` address types (`IpAddr` and friends) are plain values and
/// stay allowed; only sockets and synchronous resolution block.
pub const BLOCKING_PATTERNS: &[(&str, &str)] = &[
    ("TcpStream", "Blocking socket"),
    ("TcpListener", "Blocking socket"),
    ("UdpSocket", "Blocking socket"),
    ("ToSocketAddrs", "Blocking DNS resolution"),
    (".to_socket_addrs(", "Blocking DNS resolution"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::thread::sleep", "Blocking sleep"),
];

/// Whether a blocking pattern refers to `std::net` rather than `tokio::net`
fn is_std_network(code: &str, pattern: &str) -> bool {
    if !pattern.starts_with("Tcp") && !pattern.starts_with("Udp") {
        return true;
    }
    !code.contains("tokio::net::")
}

/// Blocking calls inside async functions of `file`; test code is exempt
pub fn blocking_io_violations(file: &SourceFile) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (idx, line) in file.lines.iter().enumerate() {
        let code = code_part(line);
        if file.is_test_line(idx) {
            continue;
        }

        for (pattern, kind) in BLOCKING_PATTERNS {
            if !code.contains(pattern) || !is_std_network(code, pattern) {
                continue;
            }
            // Imports are flagged wherever they appear
            if code.trim_start().starts_with("use ") || file.is_in_async_fn(idx) {
                violations.push(Violation {
                    path: file.path.clone(),
                    line: idx + 1,
                    kind,
                    text: line.trim().to_string(),
                });
            }
        }

        // Synchronous file reads are fine during startup but not once async
        if code.contains("std::fs::") && file.is_in_async_fn(idx) {
            violations.push(Violation {
                path: file.path.clone(),
                line: idx + 1,
                kind: "Blocking file I/O in async fn",
                text: line.trim().to_string(),
            });
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_in_polling_loop_is_flagged() {
        let file = SourceFile::from_text(
            "gate.rs",
            "async fn wait_ready(&self) {\n    loop {\n        tokio::time::sleep(Duration::from_millis(50)).await;\n    }\n}",
        );
        let violations = sleep_violations(&file);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 3);
    }

    #[test]
    fn test_interval_loop_is_allowed() {
        let file = SourceFile::from_text(
            "monitor.rs",
            "let mut interval = tokio::time::interval(period);\nloop {\n    interval.tick().await;\n}",
        );
        assert!(sleep_violations(&file).is_empty());
    }

    #[test]
    fn test_commented_sleep_is_ignored() {
        let file = SourceFile::from_text("a.rs", "// never tokio::time::sleep(d) here");
        assert!(sleep_violations(&file).is_empty());
    }

    #[test]
    fn test_blocking_socket_in_async_fn_is_flagged() {
        let file = SourceFile::from_text(
            "probe.rs",
            "pub async fn probe(&self) {\n    let s = std::net::TcpStream::connect(addr);\n}",
        );
        let violations = blocking_io_violations(&file);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, "Blocking socket");
    }

    #[test]
    fn test_address_types_and_tokio_sockets_are_allowed() {
        let file = SourceFile::from_text(
            "egress.rs",
            "use std::net::{IpAddr, Ipv4Addr};\nasync fn connect() {\n    let s = tokio::net::TcpStream::connect(addr).await;\n}",
        );
        assert!(blocking_io_violations(&file).is_empty());
    }

    #[test]
    fn test_file_read_before_runtime_is_allowed() {
        let file = SourceFile::from_text(
            "config.rs",
            "pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<RoutingConfig>\nwhere\n    F: Fn(&str) -> Option<String>,\n{\n    let text = std::fs::read_to_string(path)?;\n}",
        );
        assert!(blocking_io_violations(&file).is_empty());
    }

    #[test]
    fn test_test_module_is_exempt_from_blocking_rule() {
        let file = SourceFile::from_text(
            "x.rs",
            "fn real() {}\n\n#[cfg(test)]\nmod tests {\n    async fn helper() {\n        let s = std::net::TcpListener::bind(a);\n    }\n}",
        );
        assert_eq!(file.test_section_start(), Some(2));
        assert!(blocking_io_violations(&file).is_empty());
    }
}
