//! Testbench Core Library
//!
//! Container-scoped test runs for third-party repositories: analysis,
//! dependency installation with repair, test discovery, execution and
//! canonical result formatting, each step driven by text generation.

pub mod analyzer;
pub mod bootstrap;
pub mod commit;
pub mod config;
pub mod container;
pub mod discoverer;
pub mod domain;
pub mod executor;
pub mod fakes;
pub mod formatter;
pub mod installer;
pub mod llm;
pub mod obs;
pub mod orchestrator;
pub mod parallel;
pub mod parse;
pub mod sanitize;
pub mod script;
pub mod telemetry;

pub use domain::{
    CanonicalResult, ConfigError, IntegrationTest, IntegrationTestRun, RawTestRunResult, RepoInfo,
    RepositoryAnalysis, Result, RunOutput, TestFile, TestRunOutput, TestbenchError, UNKNOWN_COMMIT,
};

pub use config::{DockerHostConfig, LlmConfig, OrchestratorConfig, PoolConfig};

pub use container::{
    ContainerError, ContainerHandle, DockerContainer, DockerHost, DockerProvisioner, ExecOutput,
    ExecRequest,
};

pub use llm::{AnthropicClient, TextGenerator};

pub use analyzer::RepositoryAnalyzer;
pub use bootstrap::SdkBootstrap;
pub use commit::CommitResolver;
pub use discoverer::TestDiscoverer;
pub use executor::TestExecutor;
pub use formatter::{ResultFormatter, RunMetadata};
pub use installer::{DependencyInstaller, InstallLog};

pub use orchestrator::{Orchestrator, Stage};
pub use parallel::{ContainerProvider, PoolOutcome, WorkerPool};

pub use sanitize::{sanitize, ScriptProfile};
pub use telemetry::init_tracing;
