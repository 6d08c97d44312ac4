//! Test file nomination.
//!
//! The model chooses candidates from a directory listing and a source file
//! sample. No filename patterns are applied locally beyond requiring paths
//! under the checkout root.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::container::{exec_lossy, read_text, shell_quote, ContainerHandle, ExecRequest};
use crate::domain::{RepositoryAnalysis, TestFile};
use crate::llm::TextGenerator;
use crate::parse::{parse_with, PATH_LIST_CHAIN};

const SOURCE_SAMPLE_SIZE: usize = 30;

const DISCOVERY_SYSTEM_PROMPT: &str = "\
You are a test engineer picking the integration tests of a repository. Integration \
tests usually exercise several modules together, often live in directories such as \
integration, tests, test or e2e, and import a test framework. Use your own judgment \
instead of fixed patterns.

Answer with a JSON array of at most 3 absolute file paths, for example:
```json
[\"/workspace/repo/tests/integration/test_api.py\"]
```
When no clear integration tests exist, choose the most comprehensive test files.";

/// Nominates and fetches up to `max_test_files` test files.
pub struct TestDiscoverer {
    llm: Arc<dyn TextGenerator>,
    config: OrchestratorConfig,
}

impl TestDiscoverer {
    pub fn new(llm: Arc<dyn TextGenerator>, config: OrchestratorConfig) -> Self {
        Self { llm, config }
    }

    /// Returns 0..=`max_test_files` files; empty means no tests were found.
    pub async fn discover(
        &self,
        container: &dyn ContainerHandle,
        analysis: Option<&RepositoryAnalysis>,
    ) -> Vec<TestFile> {
        let root = self.config.checkout_root.trim_end_matches('/');
        let quoted_root = shell_quote(root);

        let dirs = exec_lossy(
            container,
            ExecRequest::shell(format!(
                "find {quoted_root} -type d -not -path '*/.*' | sort"
            )),
        )
        .await;
        let directory_listing = if dirs.success() { dirs.stdout } else { String::new() };

        let globs = analysis
            .map(RepositoryAnalysis::source_globs)
            .unwrap_or_else(|| vec!["*.py"]);
        let name_filter = globs
            .iter()
            .map(|g| format!("-name '{g}'"))
            .collect::<Vec<_>>()
            .join(" -o ");
        let sample = exec_lossy(
            container,
            ExecRequest::shell(format!(
                "find {quoted_root} -type f \\( {name_filter} \\) | head -n {SOURCE_SAMPLE_SIZE}"
            )),
        )
        .await;
        let source_sample = if sample.success() { sample.stdout } else { String::new() };

        let prompt = format!(
            "Identify the most relevant integration test files in this repository.\n\n\
             Directory structure:\n{directory_listing}\n\n\
             Sample of source files:\n{source_sample}\n\n\
             Return up to {} full paths as a JSON array.",
            self.config.max_test_files
        );
        let response = self.llm.complete(&prompt, Some(DISCOVERY_SYSTEM_PROMPT)).await;

        let mut nominated: Vec<String> = parse_with(&response, PATH_LIST_CHAIN).unwrap_or_default();
        if nominated.is_empty() {
            debug!(raw = %response, "path list did not parse, asking for a plain list");
            let fallback = self
                .llm
                .complete(
                    &format!(
                        "The previous answer could not be parsed as JSON. List up to {} test \
                         file paths, one per line, with no JSON, code fences or commentary.",
                        self.config.max_test_files
                    ),
                    None,
                )
                .await;
            nominated = fallback.lines().map(|l| l.trim().to_string()).collect();
        }

        let candidates = select_candidates(&nominated, root, self.config.max_test_files);
        let mut files = Vec::with_capacity(candidates.len());
        for path in candidates {
            match read_text(container, &path).await {
                Some(content) => files.push(TestFile::new(path, content)),
                None => warn!(path = %path, "nominated test file could not be read"),
            }
        }

        info!(count = files.len(), "test files discovered");
        files
    }
}

/// Unique paths under `root`, in nomination order, capped at `max`.
fn select_candidates(nominated: &[String], root: &str, max: usize) -> Vec<String> {
    let prefix = format!("{root}/");
    let mut selected: Vec<String> = Vec::new();
    for path in nominated {
        let path = path.trim().trim_matches(|c| c == '"' || c == '\'' || c == ',');
        if !path.starts_with(&prefix) || path.split('/').any(|seg| seg == "..") {
            continue;
        }
        if !selected.iter().any(|p| p == path) {
            selected.push(path.to_string());
        }
        if selected.len() == max {
            break;
        }
    }
    selected
}
