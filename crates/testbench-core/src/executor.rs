//! Test execution through a generated BusyBox-compatible runner script.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::container::{exec_lossy, shell_quote, ContainerHandle, ExecRequest};
use crate::domain::{RawTestRunResult, TestFile, TestRunOutput};
use crate::llm::TextGenerator;
use crate::sanitize::{sanitize, ScriptProfile};
use crate::script;

pub const NO_TEST_FILES: &str = "No integration test files found";
pub const NO_RUNNER_SCRIPT: &str = "Failed to generate test runner script";

const RUNNER_SYSTEM_PROMPT: &str = "\
You write BusyBox sh compatible shell scripts that run test suites inside Alpine \
Linux containers. Reply with the script only, no markdown and no explanations.";

fn runner_prompt(checkout_root: &str, paths: &[&str]) -> String {
    let listing = serde_json::to_string_pretty(paths).unwrap_or_default();
    format!(
        "Write a BusyBox sh script (not bash) that runs these test files in an Alpine \
         Linux container (python:3.13-alpine):\n{listing}\n\n\
         Requirements:\n\
         1. cd to {checkout_root} and export PYTHONPATH={checkout_root}\n\
         2. Run each file individually with the framework it uses (pytest or unittest)\n\
         3. Keep going when a file fails\n\
         4. Count passed and failed files and print the totals\n\
         5. Exit 1 if any file failed, 0 otherwise\n\n\
         Compatibility:\n\
         - No arrays, no [[ ]], no (( )) arithmetic; use expr\n\
         - Quote every variable and path, initialize variables before use\n\
         - Use python3, not python"
    )
}

/// Generates, writes and runs the test-runner script.
pub struct TestExecutor {
    llm: Arc<dyn TextGenerator>,
    config: OrchestratorConfig,
}

impl TestExecutor {
    pub fn new(llm: Arc<dyn TextGenerator>, config: OrchestratorConfig) -> Self {
        Self { llm, config }
    }

    /// Run `test_files`. An empty slice aborts before touching the container.
    pub async fn run(
        &self,
        container: &dyn ContainerHandle,
        test_files: &[TestFile],
    ) -> RawTestRunResult {
        if test_files.is_empty() {
            info!("no test files supplied, aborting test run");
            return RawTestRunResult::aborted(NO_TEST_FILES);
        }

        let paths: Vec<&str> = test_files.iter().map(|f| f.path.as_str()).collect();
        let root = &self.config.checkout_root;
        let generated = self
            .llm
            .complete(&runner_prompt(root, &paths), Some(RUNNER_SYSTEM_PROMPT))
            .await;
        if generated.trim().is_empty() {
            warn!("no test runner script generated");
            return RawTestRunResult::aborted(NO_RUNNER_SCRIPT);
        }

        let body = sanitize(&generated, ScriptProfile::TestRun);
        let path = self.config.test_script_path();
        script::write_heredoc(container, &self.config.script_dir, &path, &body).await;

        // Both streams go to stdout so interleaving matches the terminal.
        let command = format!("{} 2>&1", shell_quote(&path));
        let mut request = ExecRequest::shell(command)
            .with_workdir(root.clone())
            .with_timeout(self.config.command_timeout);
        request.env = script::python_env(root);
        let output = exec_lossy(container, request).await;

        info!(exit_code = output.exit_code, files = test_files.len(), "test run finished");
        RawTestRunResult::Completed(TestRunOutput {
            success: output.exit_code == 0,
            stdout: output.combined(),
            stderr: String::new(),
            exit_code: output.exit_code,
            test_files: test_files.to_vec(),
        })
    }
}
