//! Placing generated scripts inside a container and running them.
//!
//! Each stage writes its script a different way; all three end with
//! `chmod +x`. Write failures are logged and left for the following
//! execution to surface as a non-zero exit.

use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use crate::container::{exec_lossy, shell_quote, ContainerHandle, ExecOutput, ExecRequest};

/// Prefix of the per-write heredoc delimiter used by [`write_heredoc`].
const HEREDOC_DELIMITER_PREFIX: &str = "TESTBENCH_EOF_";

/// Interpreter settings for python-based repositories.
pub fn python_env(checkout_root: &str) -> Vec<(String, String)> {
    vec![
        ("PYTHONPATH".to_string(), checkout_root.to_string()),
        ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
        ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
    ]
}

/// Write through the container's file API.
pub async fn write_file(container: &dyn ContainerHandle, path: &str, script: &str) {
    if let Err(e) = container.write_file(path, script.as_bytes()).await {
        warn!(container_id = %container.id(), path = %path, error = %e, "script write failed");
    }
    chmod(container, path).await;
}

/// Truncate, then append one `echo '...' >>` per line.
///
/// Avoids heredoc quoting issues with scripts that contain their own
/// heredocs or unbalanced quotes.
pub async fn write_line_by_line(container: &dyn ContainerHandle, path: &str, script: &str) {
    let target = shell_quote(path);
    exec_lossy(container, ExecRequest::shell(format!(": > {target}"))).await;
    for line in script.lines() {
        let escaped = line.replace('\'', "'\"'\"'");
        exec_lossy(
            container,
            ExecRequest::shell(format!("echo '{escaped}' >> {target}")),
        )
        .await;
    }
    chmod(container, path).await;
}

/// Create the parent directory and write with a single quoted heredoc.
///
/// The delimiter is fresh for every write so heredocs inside `script` cannot
/// end it early.
pub async fn write_heredoc(container: &dyn ContainerHandle, dir: &str, path: &str, script: &str) {
    exec_lossy(container, ExecRequest::argv(["mkdir", "-p", dir])).await;
    exec_lossy(container, ExecRequest::shell(heredoc_command(path, script))).await;
    chmod(container, path).await;
}

fn heredoc_command(path: &str, script: &str) -> String {
    let delimiter = format!("{HEREDOC_DELIMITER_PREFIX}{}", Uuid::new_v4().simple());
    format!(
        "cat > {} << '{delimiter}'\n{script}\n{delimiter}",
        shell_quote(path)
    )
}

async fn chmod(container: &dyn ContainerHandle, path: &str) {
    let output = exec_lossy(container, ExecRequest::argv(["chmod", "+x", path])).await;
    if !output.success() {
        warn!(container_id = %container.id(), path = %path, stderr = %output.stderr.trim(), "chmod failed");
    }
}

/// Run an executable script from `workdir`.
pub async fn run(
    container: &dyn ContainerHandle,
    path: &str,
    workdir: &str,
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
) -> ExecOutput {
    let mut request = ExecRequest::shell(shell_quote(path))
        .with_workdir(workdir)
        .with_timeout(timeout);
    request.env = env;
    exec_lossy(container, request).await
}
