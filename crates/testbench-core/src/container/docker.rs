//! `docker` CLI backed containers, local or through an `ssh` prefix.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{
    shell_quote, ContainerError, ContainerHandle, ExecOutput, ExecRequest, TIMEOUT_EXIT_CODE,
};
use crate::config::DockerHostConfig;
use crate::parallel::ContainerProvider;

/// Extra time the client gets beyond an in-container limit before it is
/// killed on the host.
const CLIENT_GRACE: Duration = Duration::from_secs(5);

/// Exit status of a command killed by `timeout -s KILL`.
const KILLED_EXIT_CODE: i32 = 137;

/// A docker daemon reachable locally or over ssh.
#[derive(Debug, Clone)]
pub struct DockerHost {
    config: Arc<DockerHostConfig>,
}

impl DockerHost {
    pub fn new(config: DockerHostConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &DockerHostConfig {
        &self.config
    }

    /// Verify the docker client can reach its daemon.
    pub async fn check_available(&self) -> Result<(), ContainerError> {
        let output = self
            .docker(
                &["version", "--format", "{{.Server.Version}}"],
                None,
                None,
            )
            .await?;
        if output.success() {
            debug!(server_version = %output.stdout.trim(), "docker daemon reachable");
            Ok(())
        } else {
            Err(ContainerError::StepFailed {
                step: "docker version".to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            })
        }
    }

    /// Attach to an existing container by id or name.
    pub fn attach(&self, id: impl Into<String>) -> DockerContainer {
        DockerContainer {
            host: self.clone(),
            id: id.into(),
        }
    }

    /// Start a fresh container, install git, and clone `repo_url` into
    /// `checkout_root`. The container is removed again if any step fails.
    #[instrument(skip(self), fields(image = %self.config.image))]
    pub async fn provision(
        &self,
        repo_url: &str,
        checkout_root: &str,
    ) -> Result<DockerContainer, ContainerError> {
        let name = self.container_name(repo_url);
        let run = self
            .docker(
                &[
                    "run",
                    "-d",
                    "--name",
                    &name,
                    &format!("--memory={}", self.config.memory_limit),
                    "--workdir",
                    "/workspace",
                    &self.config.image,
                    "sleep",
                    "infinity",
                ],
                None,
                None,
            )
            .await?;
        if !run.success() {
            return Err(ContainerError::StepFailed {
                step: "docker run".to_string(),
                exit_code: run.exit_code,
                stderr: run.stderr,
            });
        }

        let container = self.attach(name);
        info!(container = %container.id, "container started");

        let steps: [(&str, ExecRequest); 3] = [
            (
                "install git",
                ExecRequest::argv(["apk", "add", "--no-cache", "git"]),
            ),
            (
                "create checkout directory",
                ExecRequest::argv(["mkdir", "-p", checkout_root]),
            ),
            (
                "git clone",
                ExecRequest::argv(["git", "clone", repo_url, "."]).with_workdir(checkout_root),
            ),
        ];

        for (step, request) in steps {
            let output = match container.exec(request).await {
                Ok(output) => output,
                Err(e) => {
                    self.remove(&container).await;
                    return Err(e);
                }
            };
            if !output.success() {
                self.remove(&container).await;
                return Err(ContainerError::StepFailed {
                    step: step.to_string(),
                    exit_code: output.exit_code,
                    stderr: output.stderr,
                });
            }
        }

        info!(container = %container.id, "repository cloned");
        Ok(container)
    }

    /// Force-remove a container. Failures are logged, not returned.
    pub async fn remove(&self, container: &DockerContainer) {
        match self.docker(&["rm", "-f", &container.id], None, None).await {
            Ok(output) if output.success() => debug!(container = %container.id, "container removed"),
            Ok(output) => {
                warn!(container = %container.id, stderr = %output.stderr.trim(), "container removal failed")
            }
            Err(e) => warn!(container = %container.id, error = %e, "container removal failed"),
        }
    }

    fn container_name(&self, repo_url: &str) -> String {
        let repo = repo_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("repo")
            .trim_end_matches(".git");
        let slug: String = repo
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .take(40)
            .collect();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}_{}_{}", self.config.name_prefix, slug, &suffix[..12])
    }

    /// Run the docker client with `args`, optionally piping `stdin`.
    async fn docker(
        &self,
        args: &[&str],
        stdin: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, ContainerError> {
        let mut command = match &self.config.ssh_target {
            Some(target) => {
                let remote = std::iter::once(self.config.docker_bin.as_str())
                    .chain(args.iter().copied())
                    .map(shell_quote)
                    .collect::<Vec<_>>()
                    .join(" ");
                let mut cmd = Command::new("ssh");
                cmd.args(["-o", "BatchMode=yes", target.as_str(), remote.as_str()]);
                cmd
            }
            None => {
                let mut cmd = Command::new(&self.config.docker_bin);
                cmd.args(args);
                cmd
            }
        };

        command
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let program = if self.config.ssh_target.is_some() {
            "ssh".to_string()
        } else {
            self.config.docker_bin.clone()
        };
        let mut child = command
            .spawn()
            .map_err(|source| ContainerError::Spawn { program, source })?;

        if let Some(bytes) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(bytes).await?;
                pipe.shutdown().await?;
            }
        }

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result?,
                // Dropping the future kills the client process.
                Err(_) => return Ok(ExecOutput::timeout(limit)),
            },
            None => child.wait_with_output().await?,
        };

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            timed_out: false,
        })
    }
}

/// One fresh container per repository, cloned into `checkout_root` and
/// removed once the run is over.
#[derive(Debug, Clone)]
pub struct DockerProvisioner {
    host: DockerHost,
    checkout_root: String,
}

impl DockerProvisioner {
    pub fn new(host: DockerHost, checkout_root: impl Into<String>) -> Self {
        Self {
            host,
            checkout_root: checkout_root.into(),
        }
    }
}

#[async_trait]
impl ContainerProvider for DockerProvisioner {
    type Container = DockerContainer;

    async fn provision(&self, repo_url: &str) -> Result<DockerContainer, ContainerError> {
        self.host.provision(repo_url, &self.checkout_root).await
    }

    async fn release(&self, container: DockerContainer) {
        self.host.remove(&container).await;
    }
}

/// A running container addressed through its [`DockerHost`].
#[derive(Debug, Clone)]
pub struct DockerContainer {
    host: DockerHost,
    id: String,
}

impl DockerContainer {
    fn exec_args(&self, request: &ExecRequest, interactive: bool) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if interactive {
            args.push("-i".to_string());
        }
        for (key, value) in &request.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        if let Some(workdir) = &request.workdir {
            args.push("--workdir".to_string());
            args.push(workdir.clone());
        }
        args.push(self.id.clone());
        if let Some(limit) = request.timeout {
            args.extend(["timeout", "-s", "KILL"].map(String::from));
            args.push(limit_secs(limit).to_string());
        }
        args.extend(request.argv.iter().cloned());
        args
    }
}

/// Whole seconds for `timeout`, rounded up and never zero.
fn limit_secs(limit: Duration) -> u64 {
    let secs = limit.as_secs() + u64::from(limit.subsec_nanos() > 0);
    secs.max(1)
}

/// Map a `timeout`-wrapped exit back to [`ExecOutput::timeout`] when the
/// limit was actually reached.
fn classify_limited(output: ExecOutput, limit: Duration, elapsed: Duration) -> ExecOutput {
    let killed = matches!(output.exit_code, KILLED_EXIT_CODE | TIMEOUT_EXIT_CODE);
    if output.timed_out || !killed || elapsed < limit {
        return output;
    }
    ExecOutput {
        stdout: output.stdout,
        ..ExecOutput::timeout(limit)
    }
}

#[async_trait]
impl ContainerHandle for DockerContainer {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip(self, request), fields(container = %self.id, command = %request.argv.first().map(String::as_str).unwrap_or("")))]
    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput, ContainerError> {
        if request.argv.is_empty() {
            return Err(ContainerError::EmptyCommand);
        }
        let args = self.exec_args(&request, false);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let Some(limit) = request.timeout else {
            return self.host.docker(&args, None, None).await;
        };

        // The process inside the container is killed by `timeout`; the host
        // side limit only covers a client that hangs past it.
        let started = Instant::now();
        let output = self
            .host
            .docker(&args, None, Some(limit + CLIENT_GRACE))
            .await?;
        let output = classify_limited(output, limit, started.elapsed());
        if output.timed_out {
            warn!(
                container = %self.id,
                limit_secs = limit.as_secs(),
                "command killed at its time limit"
            );
        }
        Ok(output)
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), ContainerError> {
        let script = format!("cat > {}", shell_quote(path));
        let request = ExecRequest::shell(script);
        let args = self.exec_args(&request, true);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.host.docker(&args, Some(contents), None).await?;
        if output.success() {
            Ok(())
        } else {
            Err(ContainerError::StepFailed {
                step: format!("write {path}"),
                exit_code: output.exit_code,
                stderr: output.stderr,
            })
        }
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, ContainerError> {
        let output = self.exec(ExecRequest::argv(["cat", path])).await?;
        if output.success() {
            Ok(output.stdout.into_bytes())
        } else {
            Err(ContainerError::FileNotFound(path.to_string()))
        }
    }
}
