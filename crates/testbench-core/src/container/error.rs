//! Container dispatch and provisioning errors.

/// Errors raised while talking to a container host.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{step} failed with exit code {exit_code}: {stderr}")]
    StepFailed {
        step: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("command timed out after {0} seconds")]
    Timeout(u64),

    #[error("file not found in container: {0}")]
    FileNotFound(String),

    #[error("empty command")]
    EmptyCommand,
}
