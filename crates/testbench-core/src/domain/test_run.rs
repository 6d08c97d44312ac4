//! Discovered test files and raw execution output.

use serde::{Deserialize, Serialize};

/// A test file fetched from the container checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFile {
    /// Absolute path inside the container.
    pub path: String,
    pub content: String,
}

impl TestFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Output of a completed test-runner execution, uninterpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunOutput {
    pub success: bool,
    /// Merged stdout and stderr of the runner script.
    pub stdout: String,
    /// Always empty: the runner merges both streams into `stdout`.
    pub stderr: String,
    pub exit_code: i32,
    pub test_files: Vec<TestFile>,
}

/// Result of the test-execution stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RawTestRunResult {
    Completed(TestRunOutput),
    /// The stage gave up before running anything.
    Aborted { error: String },
}

impl RawTestRunResult {
    pub fn aborted(error: impl Into<String>) -> Self {
        RawTestRunResult::Aborted {
            error: error.into(),
        }
    }

    pub fn success(&self) -> bool {
        match self {
            RawTestRunResult::Completed(output) => output.success,
            RawTestRunResult::Aborted { .. } => false,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RawTestRunResult::Completed(_) => None,
            RawTestRunResult::Aborted { error } => Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_is_never_successful() {
        let result = RawTestRunResult::aborted("No integration test files found");
        assert!(!result.success());
        assert_eq!(result.error(), Some("No integration test files found"));
    }

    #[test]
    fn completed_success_follows_output() {
        let result = RawTestRunResult::Completed(TestRunOutput {
            success: true,
            stdout: "2 passed".into(),
            stderr: String::new(),
            exit_code: 0,
            test_files: vec![TestFile::new("/workspace/repo/tests/test_a.py", "")],
        });
        assert!(result.success());
        assert!(result.error().is_none());
    }
}
