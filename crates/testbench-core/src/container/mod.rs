//! Isolated execution environments bound to a repository checkout.
//!
//! [`ContainerHandle`] is the seam every pipeline stage talks through. The
//! docker implementation lives in [`docker`]; tests use
//! [`crate::fakes::FakeContainer`].

pub mod docker;
pub mod error;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use docker::{DockerContainer, DockerHost, DockerProvisioner};
pub use error::ContainerError;

/// Exit code reported when a command exceeds its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// A command to run inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub workdir: Option<String>,
    pub timeout: Option<Duration>,
}

impl ExecRequest {
    pub fn argv<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            workdir: None,
            timeout: None,
        }
    }

    /// `sh -c <script>`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::argv(["sh".to_string(), "-c".to_string(), script.into()])
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Space-joined argv, for logs and matching.
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// Captured result of an [`ExecRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: String::new(),
            stderr: format!("[testbench] command timed out after {}s", after.as_secs()),
            timed_out: true,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, separated by a newline when both are present.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// An isolated environment holding a repository checkout.
#[async_trait]
pub trait ContainerHandle: Send + Sync {
    /// Host-side identifier (container id or name).
    fn id(&self) -> &str;

    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput, ContainerError>;

    /// Replace the file at `path` with `contents`.
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), ContainerError>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, ContainerError>;
}

/// Run a command, turning dispatch errors into a failed output.
///
/// Pipeline stages never propagate container errors; a command that could
/// not be dispatched looks like a command that failed.
pub async fn exec_lossy(container: &dyn ContainerHandle, request: ExecRequest) -> ExecOutput {
    let command = request.command_line();
    match container.exec(request).await {
        Ok(output) => output,
        Err(ContainerError::Timeout(secs)) => ExecOutput::timeout(Duration::from_secs(secs)),
        Err(e) => {
            tracing::warn!(container_id = %container.id(), command = %truncate(&command, 120), error = %e, "exec dispatch failed");
            ExecOutput::failed(-1, e.to_string())
        }
    }
}

/// Read a file as UTF-8 (lossy), `None` when it cannot be read.
pub async fn read_text(container: &dyn ContainerHandle, path: &str) -> Option<String> {
    match container.read_file(path).await {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            tracing::debug!(container_id = %container.id(), path = %path, error = %e, "read failed");
            None
        }
    }
}

/// Single-quote `value` for POSIX sh.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-=:@+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_request_wraps_in_sh() {
        let req = ExecRequest::shell("ls -la")
            .with_workdir("/workspace/repo")
            .with_env("PYTHONUNBUFFERED", "1");
        assert_eq!(req.argv, vec!["sh", "-c", "ls -la"]);
        assert_eq!(req.workdir.as_deref(), Some("/workspace/repo"));
        assert_eq!(req.env, vec![("PYTHONUNBUFFERED".into(), "1".into())]);
        assert_eq!(req.command_line(), "sh -c ls -la");
    }

    #[test]
    fn combined_joins_streams() {
        let out = ExecOutput {
            exit_code: 1,
            stdout: "out".into(),
            stderr: "err".into(),
            timed_out: false,
        };
        assert_eq!(out.combined(), "out\nerr");
        assert_eq!(ExecOutput::ok("only").combined(), "only");
        assert_eq!(ExecOutput::failed(2, "boom").combined(), "boom");
    }

    #[test]
    fn timeout_output_uses_conventional_code() {
        let out = ExecOutput::timeout(Duration::from_secs(5));
        assert_eq!(out.exit_code, TIMEOUT_EXIT_CODE);
        assert!(out.timed_out);
        assert!(out.stderr.contains("timed out after 5s"));
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/workspace/repo"), "/workspace/repo");
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
