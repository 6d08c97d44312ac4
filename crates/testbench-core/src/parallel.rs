//! Bounded concurrent execution of independent runs, one container each.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::PoolConfig;
use crate::container::{ContainerError, ContainerHandle};
use crate::domain::{CanonicalResult, UNKNOWN_COMMIT};
use crate::orchestrator::{panic_message, Orchestrator};

/// Supplies a fresh container for each repository and tears it down after.
#[async_trait]
pub trait ContainerProvider: Send + Sync + 'static {
    type Container: ContainerHandle + 'static;

    async fn provision(&self, repo_url: &str) -> Result<Self::Container, ContainerError>;

    async fn release(&self, container: Self::Container);
}

/// A finished run, paired with the repository it was started for.
#[derive(Debug, Clone)]
pub struct PoolOutcome {
    pub repo_url: String,
    pub record: CanonicalResult,
}

pub struct WorkerPool<P> {
    provider: Arc<P>,
    orchestrator: Arc<Orchestrator>,
    permits: Arc<Semaphore>,
}

impl<P: ContainerProvider> WorkerPool<P> {
    pub fn new(provider: Arc<P>, orchestrator: Arc<Orchestrator>, config: &PoolConfig) -> Self {
        Self {
            provider,
            orchestrator,
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
        }
    }

    /// Run every repository, returning outcomes in completion order.
    pub async fn run_all(&self, repo_urls: Vec<String>) -> Vec<PoolOutcome> {
        let mut outcomes = Vec::with_capacity(repo_urls.len());
        self.run_each(repo_urls, |outcome| outcomes.push(outcome)).await;
        outcomes
    }

    /// Run every repository and hand each outcome to `on_outcome` as soon as
    /// it completes.
    pub async fn run_each<F>(&self, repo_urls: Vec<String>, mut on_outcome: F)
    where
        F: FnMut(PoolOutcome),
    {
        let total = repo_urls.len();
        let mut pending = FuturesUnordered::new();
        for repo_url in repo_urls {
            let handle = tokio::spawn(run_one(
                self.provider.clone(),
                self.orchestrator.clone(),
                self.permits.clone(),
                repo_url.clone(),
            ));
            pending.push(async move { (repo_url, handle.await) });
        }

        let mut finished = 0usize;
        while let Some((repo_url, joined)) = pending.next().await {
            let record = match joined {
                Ok(record) => record,
                Err(e) => {
                    let cause = if e.is_panic() {
                        panic_message(e.into_panic().as_ref())
                    } else {
                        "run was cancelled".to_string()
                    };
                    warn!(repo_url = %repo_url, cause = %cause, "worker task failed");
                    CanonicalResult::failure(repo_url.clone(), Vec::new(), UNKNOWN_COMMIT, cause)
                }
            };
            finished += 1;
            info!(repo_url = %repo_url, passed = record.passed(), finished, total, "run complete");
            on_outcome(PoolOutcome { repo_url, record });
        }
    }
}

async fn run_one<P: ContainerProvider>(
    provider: Arc<P>,
    orchestrator: Arc<Orchestrator>,
    permits: Arc<Semaphore>,
    repo_url: String,
) -> CanonicalResult {
    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return CanonicalResult::failure(
                repo_url,
                Vec::new(),
                UNKNOWN_COMMIT,
                "worker pool closed",
            )
        }
    };

    let container = match provider.provision(&repo_url).await {
        Ok(container) => container,
        Err(e) => {
            warn!(repo_url = %repo_url, error = %e, "container provisioning failed");
            return CanonicalResult::failure(
                repo_url,
                Vec::new(),
                UNKNOWN_COMMIT,
                format!("Failed to provision container: {e}"),
            );
        }
    };

    let record = orchestrator.run(&container, &repo_url).await;
    provider.release(container).await;
    record
}
