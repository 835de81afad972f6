//! Architectural Enforcement
//!
//! Source scanners used by the integration tests in `tests/` to enforce
//! production code rules across the workspace:
//! - No thread sleeps, and async sleeps only for retry backoff
//! - No `.unwrap()` / `.expect(` outside test modules
//! - No blocking I/O inside async functions
//!
//! Scanning is line-based. Comment lines are skipped and everything after
//! the first `#[cfg(test)]` in a file is treated as test code.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["switchyard/core/src", "switchyard/cli/src"];

/// A rule broken at a specific line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line_number: usize,
    /// Trimmed source line
    pub line: String,
    /// What was found
    pub kind: &'static str,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line_number,
            self.kind,
            self.line
        )
    }
}

/// Workspace root, derived from this crate's manifest directory
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// All `.rs` files under the production source roots
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.path().to_path_buf());
            }
        }
    }
    files.sort();
    files
}

/// Production lines of a source text as `(1-based line number, line)`
///
/// Stops at the first `#[cfg(test)]` and drops comment lines.
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .filter(|(_, line)| !line.trim_start().starts_with("//"))
        .map(|(idx, line)| (idx + 1, line))
        .collect()
}

/// Code part of a line, with any trailing `//` comment removed
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether the line at `idx` sits inside an `async fn`
///
/// Scans backwards to the nearest function signature.
pub fn is_in_async_function(lines: &[(usize, &str)], idx: usize) -> bool {
    for (_, line) in lines[..idx].iter().rev() {
        let line = line.trim();
        if line.contains("async fn ") {
            return true;
        }
        if line.contains("fn ") {
            return false;
        }
        if line.starts_with("mod ") || (line.starts_with("impl ") && line.contains('{')) {
            return false;
        }
    }
    false
}

/// Run `check` over every production line of every production file
///
/// `check` receives the file path, all production lines of the file and the
/// index of the current line, and returns a violation kind when the line
/// breaks a rule.
pub fn scan<F>(check: F) -> Vec<Violation>
where
    F: Fn(&Path, &[(usize, &str)], usize) -> Option<&'static str>,
{
    let mut violations = Vec::new();
    for path in production_files() {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let lines = production_lines(&content);
        for idx in 0..lines.len() {
            if let Some(kind) = check(&path, &lines, idx) {
                let (line_number, line) = lines[idx];
                violations.push(Violation {
                    path: path.clone(),
                    line_number,
                    line: line.trim().to_string(),
                    kind,
                });
            }
        }
    }
    violations
}

/// Panic with a readable report if any violations were found
pub fn assert_no_violations(rule: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!(
        "\nFound {} violation(s) of: {rule}\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let source = "fn a() {}\n// note\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        let lines = production_lines(source);
        assert_eq!(lines, vec![(1, "fn a() {}")]);
    }

    #[test]
    fn test_async_function_detection() {
        let source = "async fn bad() {\n    let x = 1;\n}\nfn good() {\n    let y = 2;\n}\n";
        let lines = production_lines(source);
        assert!(is_in_async_function(&lines, 1));
        assert!(!is_in_async_function(&lines, 4));
    }

    #[test]
    fn test_code_part_strips_trailing_comment() {
        assert_eq!(code_part("let a = 1; // .unwrap()"), "let a = 1; ");
    }

    #[test]
    fn test_production_files_found() {
        let files = production_files();
        assert!(files.iter().any(|p| p.ends_with("switchyard/core/src/lib.rs")));
        assert!(files.iter().any(|p| p.ends_with("switchyard/cli/src/main.rs")));
    }
}
