//! Dependency installation: generate, sanitize, execute, repair.
//!
//! The repair loop is bounded by `max_retries` executions in total. Each
//! failed execution may be followed by one repair request; the repaired
//! script only replaces the current one when it is non-empty and different.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::container::{exec_lossy, ContainerHandle, ExecRequest};
use crate::domain::RepositoryAnalysis;
use crate::llm::TextGenerator;
use crate::sanitize::{sanitize, strip_code_fences, ScriptProfile};
use crate::script;

const MANIFEST_PREVIEW_BYTES: usize = 500;
const REPAIR_ERROR_TAIL_CHARS: usize = 2000;
const MANIFESTS: [&str; 4] = ["requirements.txt", "setup.py", "pyproject.toml", "package.json"];

const INSTALL_SYSTEM_PROMPT: &str = "\
You are a DevOps engineer preparing an Alpine Linux container (python:3.13-alpine) \
to run a repository's test suite. Reply with a POSIX sh script only, no markdown.
Rules:
- Start with #!/bin/sh followed by set -e
- Use apk for system packages and pip for Python packages, never apt or apt-get
- Always install python3-dev gcc musl-dev build-base so wheels can compile
- Always install pytest and pytest-cov
- Do not use heredocs or backticks; use $(...) for command substitution
- Install the project itself in development mode when it is packaged
- Echo a short progress line before each step";

const REPAIR_SYSTEM_PROMPT: &str = "\
You fix failing dependency installation scripts for Alpine Linux containers \
(python:3.13-alpine). Reply with the corrected POSIX sh script only.
Rules:
- Use apk, never apt or apt-get, and Alpine package names
- BusyBox sh syntax only, no bash features
- Packages that compile need python3-dev gcc musl-dev; C and C++ need build-base
- Address the specific errors shown";

/// What happened after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    /// A different script replaced the current one.
    Replaced,
    /// The repair was empty or identical; the same script runs again.
    Unchanged,
    /// No repair was requested: the attempt succeeded or none remained.
    NotAttempted,
}

/// One execution of the install script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallAttempt {
    pub attempt: u32,
    pub exit_code: i32,
    pub repair: RepairAction,
}

/// Full account of an install run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallLog {
    pub attempts: Vec<InstallAttempt>,
    pub succeeded: bool,
    /// Combined output of the last failed execution.
    pub last_error: Option<String>,
}

impl InstallLog {
    fn not_started() -> Self {
        Self {
            attempts: Vec::new(),
            succeeded: false,
            last_error: None,
        }
    }

    pub fn executions(&self) -> usize {
        self.attempts.len()
    }
}

/// Mutable state carried across repair iterations.
struct RepairLoop {
    attempt: u32,
    script: String,
    last_error: Option<String>,
}

/// Installs a repository's dependencies inside its container.
pub struct DependencyInstaller {
    llm: Arc<dyn TextGenerator>,
    config: OrchestratorConfig,
}

impl DependencyInstaller {
    pub fn new(llm: Arc<dyn TextGenerator>, config: OrchestratorConfig) -> Self {
        Self { llm, config }
    }

    /// Install with the configured retry bound.
    pub async fn install(
        &self,
        container: &dyn ContainerHandle,
        analysis: Option<&RepositoryAnalysis>,
    ) -> bool {
        self.install_with_retries(container, analysis, self.config.install_retries)
            .await
            .succeeded
    }

    /// Install with at most `max_retries` script executions.
    pub async fn install_with_retries(
        &self,
        container: &dyn ContainerHandle,
        analysis: Option<&RepositoryAnalysis>,
        max_retries: u32,
    ) -> InstallLog {
        let analysis = effective_analysis(analysis);
        let context = self.gather_context(container).await;
        let prompt = install_prompt(&self.config.checkout_root, &analysis, &context);

        let generated = self.llm.complete(&prompt, Some(INSTALL_SYSTEM_PROMPT)).await;
        if generated.trim().is_empty() {
            warn!("no install script generated");
            return InstallLog::not_started();
        }

        let path = self.config.install_script_path.clone();
        let mut state = RepairLoop {
            attempt: 0,
            script: sanitize(&generated, ScriptProfile::Install),
            last_error: None,
        };
        script::write_line_by_line(container, &path, &state.script).await;

        let mut log = InstallLog::not_started();
        while state.attempt < max_retries {
            state.attempt += 1;
            info!(attempt = state.attempt, max_retries, "installing dependencies");

            let output = script::run(
                container,
                &path,
                &self.config.checkout_root,
                script::python_env(&self.config.checkout_root),
                self.config.command_timeout,
            )
            .await;

            if output.success() {
                info!(attempt = state.attempt, "dependencies installed");
                log.attempts.push(InstallAttempt {
                    attempt: state.attempt,
                    exit_code: 0,
                    repair: RepairAction::NotAttempted,
                });
                log.succeeded = true;
                log.last_error = None;
                return log;
            }

            let error = output.combined();
            warn!(
                attempt = state.attempt,
                exit_code = output.exit_code,
                "dependency installation failed"
            );
            state.last_error = Some(error.clone());

            let repair = if state.attempt < max_retries {
                let fixed = self.repair(container, &state.script, &error).await;
                if !fixed.is_empty() && fixed != state.script {
                    state.script = fixed;
                    script::write_line_by_line(container, &path, &state.script).await;
                    RepairAction::Replaced
                } else {
                    info!("repair produced no new script, retrying unchanged");
                    RepairAction::Unchanged
                }
            } else {
                RepairAction::NotAttempted
            };

            log.attempts.push(InstallAttempt {
                attempt: state.attempt,
                exit_code: output.exit_code,
                repair,
            });
        }

        log.last_error = state.last_error;
        log
    }

    /// Ask for a corrected script. Returns `""` when no usable answer came back.
    pub async fn repair(
        &self,
        container: &dyn ContainerHandle,
        current_script: &str,
        error_output: &str,
    ) -> String {
        let os_release = exec_lossy(container, ExecRequest::argv(["cat", "/etc/os-release"]))
            .await
            .stdout;
        let prompt = format!(
            "The dependency installation script failed in an Alpine Linux container.\n\n\
             Container OS information:\n```\n{os_release}\n```\n\n\
             Current script:\n```sh\n{current_script}\n```\n\n\
             Error output (last {REPAIR_ERROR_TAIL_CHARS} characters):\n```\n{}\n```\n\n\
             Return the corrected script only.",
            tail_chars(error_output, REPAIR_ERROR_TAIL_CHARS)
        );

        let fixed = strip_code_fences(&self.llm.complete(&prompt, Some(REPAIR_SYSTEM_PROMPT)).await);
        if fixed.is_empty() {
            return String::new();
        }
        sanitize(&fixed, ScriptProfile::Install)
    }

    async fn gather_context(&self, container: &dyn ContainerHandle) -> String {
        let root = &self.config.checkout_root;
        let run = |cmd: String| {
            exec_lossy(container, ExecRequest::shell(cmd).with_workdir(root.clone()))
        };

        let listing = run("ls -la".to_string()).await.stdout;
        let manifests = run(
            "find . -type f \\( -name '*.py' -o -name 'requirements*.txt' -o -name 'setup.py' \
             -o -name 'pyproject.toml' -o -name 'package.json' \\) | sort | head -20"
                .to_string(),
        )
        .await
        .stdout;

        let mut context = format!(
            "Repository listing:\n```\n{listing}\n```\n\n\
             Source and manifest files:\n```\n{manifests}\n```\n"
        );
        for manifest in MANIFESTS {
            let head = run(format!(
                "head -c {MANIFEST_PREVIEW_BYTES} {manifest} 2>/dev/null || echo 'Not found'"
            ))
            .await
            .stdout;
            context.push_str(&format!("\n{manifest} (first {MANIFEST_PREVIEW_BYTES} bytes):\n```\n{head}\n```\n"));
        }
        context
    }
}

/// Substitute a python project with a requirements file when nothing was detected.
fn effective_analysis(analysis: Option<&RepositoryAnalysis>) -> RepositoryAnalysis {
    let mut analysis = analysis.cloned().unwrap_or_default();
    if !analysis.has_languages() {
        info!("no languages detected, assuming a python project");
        analysis.languages = vec!["python".to_string()];
        if !analysis.package_files.iter().any(|f| f.ends_with("requirements.txt")) {
            analysis.package_files.push("requirements.txt".to_string());
        }
    }
    analysis
}

fn install_prompt(checkout_root: &str, analysis: &RepositoryAnalysis, context: &str) -> String {
    let analysis_json = serde_json::to_string_pretty(analysis).unwrap_or_default();
    format!(
        "Write a shell script that installs everything needed to run the tests of the \
         repository at {checkout_root}: system packages, project dependencies, the project \
         itself, and the test frameworks. Return the script text only.\n\n\
         Repository analysis:\n```json\n{analysis_json}\n```\n\n{context}"
    )
}

fn tail_chars(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    match s.char_indices().nth(count - max) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ExecOutput;
    use crate::fakes::{FakeContainer, ScriptedTextGenerator};

    const RUN: &str = "sh -c /tmp/install_dependencies.sh";

    fn installer(llm: Arc<ScriptedTextGenerator>) -> DependencyInstaller {
        DependencyInstaller::new(llm, OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn first_success_returns_true() {
        let llm = Arc::new(ScriptedTextGenerator::new(["pip install -r requirements.txt"]));
        let container = FakeContainer::default();

        let log = installer(llm.clone())
            .install_with_retries(&container, None, 3)
            .await;
        assert!(log.succeeded);
        assert_eq!(log.executions(), 1);
        assert_eq!(llm.call_count(), 1);

        let run = &container.calls_matching(RUN)[0];
        assert_eq!(run.workdir.as_deref(), Some("/workspace/repo"));
        assert!(run
            .env
            .contains(&("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string())));
        assert!(!container.calls_matching("echo 'set -e' >>").is_empty());
    }

    #[tokio::test]
    async fn default_analysis_is_python_with_requirements() {
        let llm = Arc::new(ScriptedTextGenerator::new(["true"]));
        let container = FakeContainer::default();
        installer(llm.clone()).install(&container, None).await;

        let prompt = &llm.prompts()[0];
        assert!(prompt.prompt.contains("\"python\""));
        assert!(prompt.prompt.contains("requirements.txt"));
        assert_eq!(prompt.system.as_deref(), Some(INSTALL_SYSTEM_PROMPT));
    }

    #[tokio::test]
    async fn reads_manifests_before_generation() {
        let llm = Arc::new(ScriptedTextGenerator::new(["true"]));
        let container = FakeContainer::default()
            .on("head -c 500 requirements.txt", ExecOutput::ok("requests==2.31\n"));
        installer(llm.clone()).install(&container, None).await;

        assert_eq!(container.calls_matching("ls -la").len(), 1);
        assert_eq!(container.calls_matching("head -c 500").len(), 4);
        assert!(llm.prompts()[0].prompt.contains("requests==2.31"));
    }

    #[tokio::test]
    async fn identical_repairs_stop_after_max_retries() {
        let llm = Arc::new(ScriptedTextGenerator::new([
            "pip install broken",
            "pip install fixed",
            "pip install fixed",
        ]));
        let container = FakeContainer::default().on(RUN, ExecOutput::failed(1, "ERROR: no wheel"));

        let log = installer(llm.clone())
            .install_with_retries(&container, None, 3)
            .await;
        assert!(!log.succeeded);
        assert_eq!(log.executions(), 3);
        assert_eq!(container.calls_matching(RUN).len(), 3);
        assert_eq!(log.attempts[0].repair, RepairAction::Replaced);
        assert_eq!(log.attempts[1].repair, RepairAction::Unchanged);
        assert_eq!(log.attempts[2].repair, RepairAction::NotAttempted);
        // One generation plus one repair per non-final failure.
        assert_eq!(llm.call_count(), 3);
        assert!(log.last_error.unwrap().contains("no wheel"));
    }

    #[tokio::test]
    async fn repair_prompt_carries_os_release_and_error_tail() {
        let llm = Arc::new(ScriptedTextGenerator::new(["pip install x", ""]));
        let long_error = format!("{}TAIL_MARKER", "x".repeat(5000));
        let container = FakeContainer::default()
            .on("/etc/os-release", ExecOutput::ok("NAME=\"Alpine Linux\""))
            .on_sequence(
                RUN,
                vec![ExecOutput::failed(1, long_error), ExecOutput::ok("done")],
            );

        let log = installer(llm.clone())
            .install_with_retries(&container, None, 3)
            .await;
        assert!(log.succeeded);
        assert_eq!(log.attempts[0].repair, RepairAction::Unchanged);

        let repair_prompt = &llm.prompts()[1];
        assert!(repair_prompt.prompt.contains("Alpine Linux"));
        assert!(repair_prompt.prompt.contains("TAIL_MARKER"));
        assert!(!repair_prompt.prompt.contains(&"x".repeat(2001)));
        assert_eq!(repair_prompt.system.as_deref(), Some(REPAIR_SYSTEM_PROMPT));
    }

    #[tokio::test]
    async fn empty_generation_fails_without_executing() {
        let llm = Arc::new(ScriptedTextGenerator::new([""]));
        let container = FakeContainer::default();

        assert!(!installer(llm).install(&container, None).await);
        assert!(container.calls_matching(RUN).is_empty());
    }

    #[tokio::test]
    async fn zero_retries_never_executes() {
        let llm = Arc::new(ScriptedTextGenerator::new(["true"]));
        let container = FakeContainer::default();
        let log = installer(llm).install_with_retries(&container, None, 0).await;
        assert!(!log.succeeded);
        assert_eq!(log.executions(), 0);
    }

    #[test]
    fn detected_languages_are_kept() {
        let analysis = RepositoryAnalysis {
            languages: vec!["javascript".into()],
            package_files: vec!["package.json".into()],
            ..RepositoryAnalysis::default()
        };
        let effective = effective_analysis(Some(&analysis));
        assert_eq!(effective, analysis);
    }

    #[test]
    fn tail_chars_keeps_suffix() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
    }
}
