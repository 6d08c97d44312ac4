//! Testbench CLI
//!
//! The `testbench` command runs a repository's integration tests inside a
//! container and prints the canonical result as JSON on stdout.
//!
//! ## Commands
//!
//! - `run`: test one repository in an existing container
//! - `batch`: provision a container per repository and run them concurrently
//! - `results`: list stored results

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use testbench_core::{
    AnthropicClient, CanonicalResult, DockerHost, DockerHostConfig, DockerProvisioner, LlmConfig,
    Orchestrator, OrchestratorConfig, PoolConfig, SdkBootstrap, WorkerPool,
};
use testbench_store::{ResultStore, SurrealResultStore};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "testbench")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Container-scoped, model-driven test runs for arbitrary repositories", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Do not persist results
    #[arg(long, global = true)]
    no_save: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test a repository already cloned into a running container
    Run {
        /// Container id or name
        #[arg(short, long)]
        container: String,

        /// Remote URL of the repository checked out in the container
        #[arg(short, long)]
        repo_url: String,
    },

    /// Provision a container per repository and test them concurrently
    Batch {
        /// Repository URLs to clone and test
        #[arg(required = true)]
        repo_urls: Vec<String>,

        /// Maximum concurrent runs
        #[arg(short, long, env = "TESTBENCH_CONCURRENCY")]
        concurrency: Option<usize>,

        /// Container image
        #[arg(long, env = "TESTBENCH_IMAGE")]
        image: Option<String>,

        /// Run docker on this host over ssh
        #[arg(long, env = "TESTBENCH_SSH_TARGET")]
        ssh_target: Option<String>,
    },

    /// List stored results, newest first
    Results {
        /// Only the latest result for this repository
        #[arg(short, long)]
        repo_url: Option<String>,

        /// Maximum number of results to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    testbench_core::init_tracing(cli.json, level);

    let handle = SurrealResultStore::setup_from_env()
        .await
        .context("Failed to connect to result store")?;
    let store: Option<&dyn ResultStore> = if cli.no_save { None } else { Some(&handle) };

    match cli.command {
        Commands::Run {
            container,
            repo_url,
        } => cmd_run(store, &container, &repo_url).await,
        Commands::Batch {
            repo_urls,
            concurrency,
            image,
            ssh_target,
        } => cmd_batch(store, repo_urls, concurrency, image, ssh_target).await,
        Commands::Results { repo_url, limit } => {
            cmd_results(&handle, repo_url.as_deref(), limit).await
        }
    }
}

/// Build the orchestrator from environment configuration
fn build_orchestrator() -> Result<(Orchestrator, OrchestratorConfig)> {
    let llm_config = LlmConfig::from_env().context("Invalid model configuration")?;
    let config = OrchestratorConfig::from_env().context("Invalid orchestrator configuration")?;
    info!(model = %llm_config.model, api_key = %llm_config.redacted_key(), "model configured");

    let api_key = llm_config.api_key.clone();
    let client = AnthropicClient::new(llm_config).context("Failed to build model client")?;
    let mut orchestrator = Orchestrator::new(Arc::new(client), config.clone());
    if config.bootstrap_sdk {
        orchestrator = orchestrator.with_sdk_bootstrap(SdkBootstrap::new(api_key));
    }
    Ok((orchestrator, config))
}

async fn connect_docker(config: DockerHostConfig) -> Result<DockerHost> {
    let host = DockerHost::new(config);
    host.check_available()
        .await
        .context("docker is not available")?;
    Ok(host)
}

async fn persist(store: Option<&dyn ResultStore>, record: &CanonicalResult) {
    let Some(store) = store else {
        return;
    };
    match store.save(record).await {
        Ok(id) => info!(id = %&id[..12.min(id.len())], repo_url = %record.remote_url(), "result saved"),
        Err(e) => warn!(error = %e, repo_url = %record.remote_url(), "failed to save result"),
    }
}

/// Test one repository in an existing container
async fn cmd_run(store: Option<&dyn ResultStore>, container: &str, repo_url: &str) -> Result<()> {
    let (orchestrator, _) = build_orchestrator()?;
    let docker = DockerHostConfig::from_env().context("Invalid docker configuration")?;
    let host = connect_docker(docker).await?;

    let container = host.attach(container);
    let record = orchestrator.run(&container, repo_url).await;
    persist(store, &record).await;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Provision and test many repositories
async fn cmd_batch(
    store: Option<&dyn ResultStore>,
    repo_urls: Vec<String>,
    concurrency: Option<usize>,
    image: Option<String>,
    ssh_target: Option<String>,
) -> Result<()> {
    let (orchestrator, config) = build_orchestrator()?;

    let mut docker = DockerHostConfig::from_env().context("Invalid docker configuration")?;
    if let Some(image) = image {
        docker.image = image;
    }
    if let Some(target) = ssh_target.filter(|t| !t.trim().is_empty()) {
        docker.ssh_target = Some(target);
    }
    let host = connect_docker(docker).await?;

    let mut pool_config = PoolConfig::from_env().context("Invalid pool configuration")?;
    if let Some(concurrency) = concurrency {
        anyhow::ensure!(concurrency > 0, "--concurrency must be at least 1");
        pool_config.concurrency = concurrency;
    }

    let total = repo_urls.len();
    info!(total, concurrency = pool_config.concurrency, "starting batch");
    let provisioner = DockerProvisioner::new(host, config.checkout_root.clone());
    let pool = WorkerPool::new(Arc::new(provisioner), Arc::new(orchestrator), &pool_config);
    let outcomes = pool.run_all(repo_urls).await;

    let mut records = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        persist(store, &outcome.record).await;
        records.push(outcome.record);
    }
    let passed = records.iter().filter(|r| r.passed()).count();
    info!(total, passed, failed = total - passed, "batch complete");

    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

/// List stored results
async fn cmd_results(store: &dyn ResultStore, repo_url: Option<&str>, limit: usize) -> Result<()> {
    let results: Vec<_> = match repo_url {
        Some(url) => store.latest_for(url).await?.into_iter().collect(),
        None => store.list(limit).await?,
    };

    if results.is_empty() {
        println!("No results stored");
        return Ok(());
    }

    for stored in results {
        println!(
            "{}  {}  {}  {}",
            stored.short_id(),
            stored.saved_at.format("%Y-%m-%d %H:%M:%S UTC"),
            if stored.passed { "PASS" } else { "FAIL" },
            stored.remote_url
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_requires_container_and_url() {
        let cli = Cli::try_parse_from([
            "testbench",
            "run",
            "--container",
            "abc123",
            "--repo-url",
            "https://github.com/acme/widgets",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                container,
                repo_url,
            } => {
                assert_eq!(container, "abc123");
                assert_eq!(repo_url, "https://github.com/acme/widgets");
            }
            _ => panic!("expected run"),
        }
        assert!(Cli::try_parse_from(["testbench", "run", "--container", "abc"]).is_err());
    }

    #[test]
    fn batch_needs_at_least_one_url() {
        assert!(Cli::try_parse_from(["testbench", "batch"]).is_err());
        let cli = Cli::try_parse_from([
            "testbench",
            "--no-save",
            "batch",
            "https://github.com/acme/a",
            "https://github.com/acme/b",
        ])
        .unwrap();
        assert!(cli.no_save);
        let Commands::Batch { repo_urls, .. } = cli.command else {
            panic!("expected batch");
        };
        assert_eq!(repo_urls.len(), 2);
    }

    #[test]
    fn results_defaults_to_ten() {
        let cli = Cli::try_parse_from(["testbench", "results"]).unwrap();
        let Commands::Results { repo_url, limit } = cli.command else {
            panic!("expected results");
        };
        assert!(repo_url.is_none());
        assert_eq!(limit, 10);
    }
}
