//! Setup-level error taxonomy.
//!
//! Stage failures inside a run never surface as errors; they become
//! canonical failure records. These variants cover the few conditions that
//! prevent a run from starting at all.

/// Invalid configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Testbench setup errors.
#[derive(Debug, thiserror::Error)]
pub enum TestbenchError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("container error: {0}")]
    Container(#[from] crate::container::ContainerError),

    #[error("http client error: {0}")]
    Http(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for testbench setup operations.
pub type Result<T> = std::result::Result<T, TestbenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = TestbenchError::from(ConfigError::Missing("CLAUDE_API_KEY"));
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("CLAUDE_API_KEY"));
    }

    #[test]
    fn invalid_value_display() {
        let err = ConfigError::Invalid {
            key: "TESTBENCH_MAX_RETRIES",
            value: "many".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("TESTBENCH_MAX_RETRIES"));
        assert!(msg.contains("many"));
    }
}
