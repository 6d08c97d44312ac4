//! Sequences one container-scoped test run.
//!
//! ```text
//! BOOTSTRAP? -> ANALYZE -> INSTALL -> DISCOVER -> EXECUTE -> FORMAT -> DONE
//!      \__________\__________\__________\__________\__________> ERROR
//! ```
//!
//! Every path ends in a [`CanonicalResult`]. Failures and panics inside a
//! stage become an error record carrying the cause as `stderr`.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::analyzer::RepositoryAnalyzer;
use crate::bootstrap::{SdkBootstrap, SDK_INSTALL_FAILED};
use crate::commit::CommitResolver;
use crate::config::OrchestratorConfig;
use crate::container::ContainerHandle;
use crate::discoverer::TestDiscoverer;
use crate::domain::{CanonicalResult, RawTestRunResult, UNKNOWN_COMMIT};
use crate::executor::{TestExecutor, NO_TEST_FILES};
use crate::formatter::{ResultFormatter, RunMetadata};
use crate::installer::DependencyInstaller;
use crate::llm::TextGenerator;
use crate::obs;

pub const INSTALL_FAILED: &str = "Failed to install dependencies";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Bootstrap,
    Analyze,
    Install,
    Discover,
    Execute,
    Format,
    Done,
    Error,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Bootstrap => "bootstrap",
            Stage::Analyze => "analyze",
            Stage::Install => "install",
            Stage::Discover => "discover",
            Stage::Execute => "execute",
            Stage::Format => "format",
            Stage::Done => "done",
            Stage::Error => "error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the run has learned so far; survives a panic inside a stage.
#[derive(Debug)]
struct Progress {
    run_id: String,
    stage: Stage,
    commit_id: String,
    languages: Vec<String>,
}

impl Progress {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            stage: Stage::Analyze,
            commit_id: UNKNOWN_COMMIT.to_string(),
            languages: Vec::new(),
        }
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        obs::emit_stage(&self.run_id, stage.as_str());
    }
}

pub struct Orchestrator {
    bootstrap: Option<SdkBootstrap>,
    commits: CommitResolver,
    analyzer: RepositoryAnalyzer,
    installer: DependencyInstaller,
    discoverer: TestDiscoverer,
    executor: TestExecutor,
    formatter: ResultFormatter,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn TextGenerator>, config: OrchestratorConfig) -> Self {
        Self {
            bootstrap: None,
            commits: CommitResolver::new(llm.clone(), config.checkout_root.clone()),
            analyzer: RepositoryAnalyzer::new(llm.clone(), config.clone()),
            installer: DependencyInstaller::new(llm.clone(), config.clone()),
            discoverer: TestDiscoverer::new(llm.clone(), config.clone()),
            executor: TestExecutor::new(llm.clone(), config.clone()),
            formatter: ResultFormatter::new(llm, config),
        }
    }

    /// Install the model SDK in the container before analysis.
    pub fn with_sdk_bootstrap(mut self, bootstrap: SdkBootstrap) -> Self {
        self.bootstrap = Some(bootstrap);
        self
    }

    /// Run the whole pipeline against `container`. Never fails.
    pub async fn run(&self, container: &dyn ContainerHandle, repo_url: &str) -> CanonicalResult {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id, repo_url);
        self.run_inner(container, repo_url, run_id).instrument(span).await
    }

    async fn run_inner(
        &self,
        container: &dyn ContainerHandle,
        repo_url: &str,
        run_id: String,
    ) -> CanonicalResult {
        let started = Instant::now();
        obs::emit_run_started(&run_id, repo_url, container.id());

        let mut progress = Progress::new(run_id);
        let outcome = AssertUnwindSafe(self.drive(container, repo_url, &mut progress))
            .catch_unwind()
            .await;

        let record = match outcome {
            Ok(Ok(record)) => {
                progress.enter(Stage::Done);
                record
            }
            Ok(Err(cause)) => self.fail(&mut progress, repo_url, cause),
            Err(payload) => self.fail(&mut progress, repo_url, panic_message(payload.as_ref())),
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        obs::emit_run_finished(
            &progress.run_id,
            duration_ms,
            record.integration_test_run.result.return_code,
            record.passed(),
        );
        record
    }

    async fn drive(
        &self,
        container: &dyn ContainerHandle,
        repo_url: &str,
        progress: &mut Progress,
    ) -> Result<CanonicalResult, String> {
        if let Some(bootstrap) = &self.bootstrap {
            progress.enter(Stage::Bootstrap);
            if !bootstrap.install(container).await {
                return Err(SDK_INSTALL_FAILED.to_string());
            }
        }

        progress.commit_id = self.commits.resolve(container).await;
        debug!(commit_id = %progress.commit_id, "commit resolved");

        progress.enter(Stage::Analyze);
        let analysis = self.analyzer.analyze(container).await;
        progress.languages = analysis.language_tags();

        progress.enter(Stage::Install);
        if !self.installer.install(container, Some(&analysis)).await {
            return Err(INSTALL_FAILED.to_string());
        }

        progress.enter(Stage::Discover);
        let test_files = self.discoverer.discover(container, Some(&analysis)).await;
        if test_files.is_empty() {
            return Err(NO_TEST_FILES.to_string());
        }

        progress.enter(Stage::Execute);
        let raw = self.executor.run(container, &test_files).await;
        if let RawTestRunResult::Aborted { error } = raw {
            return Err(error);
        }

        progress.enter(Stage::Format);
        let meta = RunMetadata {
            remote_url: repo_url.to_string(),
            languages: progress.languages.clone(),
            commit_id: progress.commit_id.clone(),
        };
        Ok(self.formatter.format(&meta, &raw).await)
    }

    fn fail(&self, progress: &mut Progress, repo_url: &str, cause: String) -> CanonicalResult {
        obs::emit_run_failed(&progress.run_id, progress.stage.as_str(), &cause);
        progress.stage = Stage::Error;
        CanonicalResult::failure(
            repo_url.to_string(),
            progress.languages.clone(),
            progress.commit_id.clone(),
            cause,
        )
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "run panicked".to_string()
    }
}
