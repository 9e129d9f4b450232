// runos-core/src/tools/security.rs
// ============================================================================
// Module: Security Capability
// Description: Substring pattern scanning over text and over the safe root.
// Purpose: Backs the `security` node handler.
// Dependencies: none beyond std; reuses crate::tools::files for traversal.
// ============================================================================

use crate::tools::files::FileCapability;

/// Bound on how many files [`SubstringSecurityCapability::scan_repo`] will
/// walk before stopping, so a pathological safe root cannot make a single
/// node invocation unbounded.
pub const MAX_SCANNED_FILES: usize = 2_000;

/// Outcome of a security scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityScanOutcome {
    /// Whether the scan found no blocked pattern.
    pub ok: bool,
    /// Set when `ok` is `false` and the failure is a single matched pattern.
    pub error: Option<String>,
    /// File-scoped findings from [`SecurityCapability::scan_repo`].
    pub issues: Vec<String>,
}

/// Substring-based pattern scanning, synchronous from the engine's
/// standpoint.
pub trait SecurityCapability: Send + Sync {
    /// Scans `text` for any of `patterns`, returning the first match.
    fn scan_text(&self, text: &str, patterns: &[String]) -> SecurityScanOutcome;

    /// Scans every file under the safe root for blocked patterns.
    fn scan_repo(&self) -> SecurityScanOutcome;
}

/// [`SecurityCapability`] that scans repo-relative file contents for
/// configured blocked substrings.
pub struct SubstringSecurityCapability<F> {
    files: F,
    block_patterns: Vec<String>,
    repo_files: Vec<String>,
}

impl<F: FileCapability> SubstringSecurityCapability<F> {
    /// Builds a scanner over `repo_files` (repo-relative paths), checking
    /// each against `block_patterns`.
    #[must_use]
    pub fn new(files: F, block_patterns: Vec<String>, repo_files: Vec<String>) -> Self {
        Self {
            files,
            block_patterns,
            repo_files,
        }
    }
}

impl<F: FileCapability> SecurityCapability for SubstringSecurityCapability<F> {
    fn scan_text(&self, text: &str, patterns: &[String]) -> SecurityScanOutcome {
        for pattern in patterns {
            if text.contains(pattern.as_str()) {
                return SecurityScanOutcome {
                    ok: false,
                    error: Some(format!("blocked pattern found: {pattern}")),
                    issues: Vec::new(),
                };
            }
        }
        SecurityScanOutcome {
            ok: true,
            error: None,
            issues: Vec::new(),
        }
    }

    fn scan_repo(&self) -> SecurityScanOutcome {
        use crate::tools::files::FileRead;

        let mut issues = Vec::new();
        for path in self.repo_files.iter().take(MAX_SCANNED_FILES) {
            let content = match self.files.read(path) {
                Ok(FileRead::Found { content, .. }) => content,
                Ok(FileRead::NotFound { .. }) | Err(_) => continue,
            };
            let scan = self.scan_text(&content, &self.block_patterns);
            if !scan.ok {
                issues.push(format!("{path}: {}", scan.error.unwrap_or_default()));
            }
        }
        SecurityScanOutcome {
            ok: issues.is_empty(),
            error: None,
            issues,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unit tests use unwrap for setup and assertion clarity.")]
mod tests {
    use super::*;
    use crate::tools::files::SandboxedFileCapability;

    #[test]
    fn scan_text_reports_first_blocked_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let files = SandboxedFileCapability::open(dir.path()).unwrap();
        let scanner = SubstringSecurityCapability::new(files, vec!["eval(".to_string()], Vec::new());
        let outcome = scanner.scan_text("x = eval(\"1+1\")", &["eval(".to_string()]);
        assert!(!outcome.ok);
        assert_eq!(outcome.error.as_deref(), Some("blocked pattern found: eval("));
    }

    #[test]
    fn scan_text_ok_when_no_pattern_matches() {
        let dir = tempfile::tempdir().unwrap();
        let files = SandboxedFileCapability::open(dir.path()).unwrap();
        let scanner = SubstringSecurityCapability::new(files, Vec::new(), Vec::new());
        let outcome = scanner.scan_text("safe text", &["eval(".to_string()]);
        assert!(outcome.ok);
    }

    #[test]
    fn scan_repo_collects_per_file_issues() {
        let dir = tempfile::tempdir().unwrap();
        let files = SandboxedFileCapability::open(dir.path()).unwrap();
        files.write("app.py", "eval(\"danger\")").unwrap();
        let scanner = SubstringSecurityCapability::new(
            files,
            vec!["eval(".to_string()],
            vec!["app.py".to_string()],
        );
        let outcome = scanner.scan_repo();
        assert!(!outcome.ok);
        assert_eq!(outcome.issues.len(), 1);
    }
}
