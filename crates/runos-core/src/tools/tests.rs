// runos-core/src/tools/tests.rs
// ============================================================================
// Module: Test Capability
// Description: Invokes an external test process against the safe root.
// Purpose: Backs the `tester` node handler.
// Dependencies: std::process (invoked via tokio::task::spawn_blocking at the
//               call site in crate::executor)
// ============================================================================

use std::path::PathBuf;
use std::process::Command;

use crate::error::ToolError;

/// Bound on the amount of combined stdout/stderr kept from a test run.
pub const OUTPUT_TAIL_LIMIT: usize = 2_000;

/// Outcome of invoking the test capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRunOutcome {
    /// Whether the test process exited successfully.
    pub passed: bool,
    /// Combined stdout/stderr, truncated to [`OUTPUT_TAIL_LIMIT`].
    pub output: String,
}

/// Invokes an external test process against the safe root.
pub trait TestCapability: Send + Sync {
    /// Runs the configured test command and reports pass/fail plus output.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] if the test process could not be spawned at
    /// all; a non-zero exit is reported as `passed: false`, not an error.
    fn run(&self) -> Result<TestRunOutcome, ToolError>;
}

/// [`TestCapability`] backed by spawning a configurable external command
/// with the safe root as its working directory.
pub struct ProcessTestCapability {
    safe_root: PathBuf,
    program: String,
    args: Vec<String>,
}

impl ProcessTestCapability {
    /// Builds a capability that runs `program args...` with `safe_root` as
    /// the working directory.
    #[must_use]
    pub fn new(safe_root: impl Into<PathBuf>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            safe_root: safe_root.into(),
            program: program.into(),
            args,
        }
    }
}

impl TestCapability for ProcessTestCapability {
    fn run(&self) -> Result<TestRunOutcome, ToolError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.safe_root)
            .output()
            .map_err(|err| ToolError(format!("error running {}: {err}", self.program)))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let truncated = tail(&combined, OUTPUT_TAIL_LIMIT);

        Ok(TestRunOutcome {
            passed: output.status.success(),
            output: truncated,
        })
    }
}

/// Keeps the last `limit` characters of `text`, prefixing with `...` when
/// truncated, matching the distilled system's tail-truncation behavior.
fn tail(text: &str, limit: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= limit {
        return text.to_string();
    }
    let skip = char_count - limit;
    let kept: String = text.chars().skip(skip).collect();
    format!("...{kept}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unit tests use unwrap for setup and assertion clarity.")]
mod tests {
    use super::*;

    #[test]
    fn short_output_is_not_truncated() {
        assert_eq!(tail("hello", 2_000), "hello");
    }

    #[test]
    fn long_output_keeps_tail_with_marker() {
        let long = "x".repeat(5_000);
        let result = tail(&long, 2_000);
        assert!(result.starts_with("..."));
        assert_eq!(result.len() - 3, 2_000);
    }

    #[test]
    fn successful_process_is_reported_as_passed() {
        let dir = tempfile::tempdir().unwrap();
        let cap = ProcessTestCapability::new(dir.path(), "true", Vec::new());
        let outcome = cap.run().unwrap();
        assert!(outcome.passed);
    }

    #[test]
    fn failing_process_is_reported_as_failed_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cap = ProcessTestCapability::new(dir.path(), "false", Vec::new());
        let outcome = cap.run().unwrap();
        assert!(!outcome.passed);
    }
}
