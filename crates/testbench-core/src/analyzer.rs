//! Repository structure analysis driven by a generated probing script.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::container::{ContainerHandle, ExecOutput};
use crate::domain::RepositoryAnalysis;
use crate::llm::TextGenerator;
use crate::parse::{parse_with, ANALYSIS_CHAIN};
use crate::sanitize::{sanitize, ScriptProfile};
use crate::script;

const SCHEMA_KEYS: &str = "\
- languages: array of strings (programming languages detected)
- frameworks: array of strings (frameworks and libraries detected)
- package_files: array of file paths (dependency manifests found)
- test_directories: array of directory paths
- test_files: array of file paths
- structure_summary: string (short overview of the project layout)";

fn system_prompt() -> String {
    format!(
        "You write shell scripts that inspect a checked-out Git repository and report \
         what it contains. Reply with the script only, no commentary. The script runs \
         under /bin/sh in an Alpine Linux container and must print exactly one JSON \
         object to stdout with these keys:\n{SCHEMA_KEYS}"
    )
}

fn initial_prompt(checkout_root: &str) -> String {
    format!(
        "Write a script that analyzes the repository at {checkout_root}. Detect the \
         programming languages from file extensions and contents, identify frameworks \
         from imports and configuration files, list dependency manifests \
         (requirements.txt, setup.py, pyproject.toml, package.json and similar), and \
         locate test directories and test files. Print the JSON object described in \
         the system prompt."
    )
}

fn retry_prompt(error_output: &str) -> String {
    format!(
        "The analysis script failed with this output:\n\n```\n{error_output}\n```\n\n\
         Write a simpler, defensive script that only uses basic file system commands \
         available in BusyBox. It must still print the same JSON object."
    )
}

fn reinterpret_prompt(raw_output: &str) -> String {
    format!(
        "A repository analysis script printed the following, which is not valid JSON:\n\n\
         ```\n{raw_output}\n```\n\n\
         Produce a JSON object with these keys from it:\n{SCHEMA_KEYS}\n\n\
         Reply with the JSON object only."
    )
}

/// Builds a [`RepositoryAnalysis`] for a container checkout.
pub struct RepositoryAnalyzer {
    llm: Arc<dyn TextGenerator>,
    config: OrchestratorConfig,
}

impl RepositoryAnalyzer {
    pub fn new(llm: Arc<dyn TextGenerator>, config: OrchestratorConfig) -> Self {
        Self { llm, config }
    }

    /// Analyze the checkout. Never fails; degraded results carry an empty
    /// field set and an explanatory `structure_summary`.
    pub async fn analyze(&self, container: &dyn ContainerHandle) -> RepositoryAnalysis {
        let system = system_prompt();
        let generated = self
            .llm
            .complete(&initial_prompt(&self.config.checkout_root), Some(&system))
            .await;
        if generated.trim().is_empty() {
            warn!("no analysis script generated");
            return RepositoryAnalysis::empty("Analysis failed: no analysis script was generated");
        }

        let mut output = self.run_script(container, &generated).await;
        if !output.success() {
            warn!(exit_code = output.exit_code, "analysis script failed, requesting a simpler one");
            let retry = self
                .llm
                .complete(&retry_prompt(&output.combined()), Some(&system))
                .await;
            if retry.trim().is_empty() {
                warn!("no simplified analysis script generated");
                return RepositoryAnalysis::empty(
                    "Analysis failed: no simplified analysis script was generated",
                );
            }
            output = self.run_script(container, &retry).await;
            if !output.success() {
                warn!(exit_code = output.exit_code, "simplified analysis script failed");
                return RepositoryAnalysis::empty(format!(
                    "Analysis failed: analysis script exited with code {}",
                    output.exit_code
                ));
            }
        }

        if let Some(analysis) = parse_with::<RepositoryAnalysis>(&output.stdout, ANALYSIS_CHAIN) {
            info!(languages = analysis.languages.len(), "repository analysis complete");
            return analysis;
        }

        debug!(raw = %output.stdout, "analysis output is not JSON, asking for reinterpretation");
        let reinterpreted = self
            .llm
            .complete(&reinterpret_prompt(&output.stdout), None)
            .await;
        if let Some(analysis) = parse_with::<RepositoryAnalysis>(&reinterpreted, ANALYSIS_CHAIN) {
            info!(
                languages = analysis.languages.len(),
                "repository analysis complete via reinterpretation"
            );
            return analysis;
        }

        warn!("repository analysis could not be parsed");
        RepositoryAnalysis::empty("Analysis failed: output could not be parsed")
    }

    async fn run_script(&self, container: &dyn ContainerHandle, raw: &str) -> ExecOutput {
        let body = sanitize(raw, ScriptProfile::Analysis);
        let path = &self.config.analysis_script_path;
        script::write_file(container, path, &body).await;
        script::run(
            container,
            path,
            &self.config.checkout_root,
            Vec::new(),
            self.config.command_timeout,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ExecOutput;
    use crate::fakes::{FakeContainer, ScriptedTextGenerator};

    const SCRIPT_PATH: &str = "/tmp/analyze_repo.sh";
    const RUN: &str = "sh -c /tmp/analyze_repo.sh";

    fn analyzer(llm: Arc<ScriptedTextGenerator>) -> RepositoryAnalyzer {
        RepositoryAnalyzer::new(llm, OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn parses_json_printed_by_script() {
        let llm = Arc::new(ScriptedTextGenerator::new(["```sh\nfind . -name '*.py'\n```"]));
        let container = FakeContainer::default().on(
            RUN,
            ExecOutput::ok("scanning\n{\"languages\": [\"python\"], \"frameworks\": [\"pytest\"]}\n"),
        );

        let analysis = analyzer(llm.clone()).analyze(&container).await;
        assert_eq!(analysis.languages, vec!["python"]);
        assert_eq!(analysis.frameworks, vec!["pytest"]);
        assert_eq!(llm.call_count(), 1);
        assert_eq!(
            container.file(SCRIPT_PATH).as_deref(),
            Some("#!/bin/sh\nfind . -name '*.py'")
        );
        let run = &container.calls_matching(RUN)[0];
        assert_eq!(run.workdir.as_deref(), Some("/workspace/repo"));
    }

    #[tokio::test]
    async fn double_failure_returns_empty_analysis_without_parsing() {
        let llm = Arc::new(ScriptedTextGenerator::new(["ls -R", "ls"]));
        let container = FakeContainer::default().on(
            RUN,
            ExecOutput {
                exit_code: 2,
                stdout: "{\"languages\": [\"python\"]}".into(),
                stderr: "sh: syntax error".into(),
                timed_out: false,
            },
        );

        let analysis = analyzer(llm.clone()).analyze(&container).await;
        assert!(analysis.languages.is_empty());
        assert!(analysis.test_files.is_empty());
        assert!(analysis.structure_summary.contains("code 2"));
        assert_eq!(llm.call_count(), 2);
        assert!(llm.prompts()[1].prompt.contains("sh: syntax error"));
        assert_eq!(container.calls_matching(RUN).len(), 2);
    }

    #[tokio::test]
    async fn empty_retry_generation_skips_execution() {
        let llm = Arc::new(ScriptedTextGenerator::new(["ls -R", ""]));
        let container = FakeContainer::default().on(RUN, ExecOutput::failed(2, "sh: syntax error"));

        let analysis = analyzer(llm.clone()).analyze(&container).await;
        assert!(!analysis.has_languages());
        assert!(analysis.structure_summary.contains("no simplified analysis script"));
        assert_eq!(llm.call_count(), 2);
        assert_eq!(container.calls_matching(RUN).len(), 1);
    }

    #[tokio::test]
    async fn retry_success_is_parsed() {
        let llm = Arc::new(ScriptedTextGenerator::new(["bad", "good"]));
        let container = FakeContainer::default().on_sequence(
            RUN,
            vec![
                ExecOutput::failed(127, "not found"),
                ExecOutput::ok("{\"languages\": [\"go\"]}"),
            ],
        );

        let analysis = analyzer(llm).analyze(&container).await;
        assert_eq!(analysis.languages, vec!["go"]);
    }

    #[tokio::test]
    async fn unparseable_output_is_reinterpreted() {
        let llm = Arc::new(ScriptedTextGenerator::new([
            "echo languages: python",
            "{\"languages\": [\"python\"], \"structure_summary\": \"flat layout\"}",
        ]));
        let container =
            FakeContainer::default().on(RUN, ExecOutput::ok("languages: python"));

        let analysis = analyzer(llm.clone()).analyze(&container).await;
        assert_eq!(analysis.structure_summary, "flat layout");
        let prompts = llm.prompts();
        assert!(prompts[1].prompt.contains("languages: python"));
        assert!(prompts[1].system.is_none());
    }

    #[tokio::test]
    async fn everything_failing_yields_summary() {
        let llm = Arc::new(ScriptedTextGenerator::new(["echo nope", "still not json"]));
        let container = FakeContainer::default().on(RUN, ExecOutput::ok("nope"));

        let analysis = analyzer(llm).analyze(&container).await;
        assert!(!analysis.has_languages());
        assert!(!analysis.structure_summary.is_empty());
    }

    #[tokio::test]
    async fn empty_generation_skips_execution() {
        let llm = Arc::new(ScriptedTextGenerator::new([""]));
        let container = FakeContainer::default();

        let analysis = analyzer(llm).analyze(&container).await;
        assert!(!analysis.structure_summary.is_empty());
        assert_eq!(container.interaction_count(), 0);
    }
}
