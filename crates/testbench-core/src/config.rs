//! Explicit configuration for each component.
//!
//! Every struct has a `Default` carrying the production values and a
//! `from_env` reading `TESTBENCH_*` overrides. Parsing goes through a lookup
//! closure so tests never touch the process environment.

use std::str::FromStr;
use std::time::Duration;

use crate::domain::ConfigError;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_API_BASE: &str = "https://api.anthropic.com";

/// Text generation client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4000,
            temperature: 0.0,
            base_url: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl LlmConfig {
    /// Reads `CLAUDE_API_KEY` (or `ANTHROPIC_API_KEY`) plus optional
    /// `TESTBENCH_MODEL`, `TESTBENCH_MAX_TOKENS`, `TESTBENCH_LLM_BASE_URL`
    /// and `TESTBENCH_LLM_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let api_key = lookup("CLAUDE_API_KEY")
            .or_else(|| lookup("ANTHROPIC_API_KEY"))
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::Missing("CLAUDE_API_KEY"))?;

        Ok(Self {
            api_key,
            model: lookup("TESTBENCH_MODEL").unwrap_or(defaults.model),
            max_tokens: parse_or(&lookup, "TESTBENCH_MAX_TOKENS", defaults.max_tokens)?,
            temperature: defaults.temperature,
            base_url: lookup("TESTBENCH_LLM_BASE_URL").unwrap_or(defaults.base_url),
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "TESTBENCH_LLM_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
        })
    }

    /// API key prefix safe for logging.
    pub fn redacted_key(&self) -> String {
        let prefix: String = self.api_key.chars().take(8).collect();
        format!("{prefix}...")
    }
}

/// Paths, bounds and toggles for one orchestrated run.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Where the repository is cloned inside the container.
    pub checkout_root: String,
    /// Directory holding the generated test-runner script.
    pub script_dir: String,
    pub analysis_script_path: String,
    pub install_script_path: String,
    /// Total install executions, including the first.
    pub install_retries: u32,
    pub max_test_files: usize,
    pub content_preview_chars: usize,
    pub output_preview_chars: usize,
    /// Default per-command timeout; `None` waits indefinitely.
    pub command_timeout: Option<Duration>,
    /// Install the LLM SDK inside the container before analysis.
    pub bootstrap_sdk: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            checkout_root: "/workspace/repo".to_string(),
            script_dir: "/workspace/scripts".to_string(),
            analysis_script_path: "/tmp/analyze_repo.sh".to_string(),
            install_script_path: "/tmp/install_dependencies.sh".to_string(),
            install_retries: 3,
            max_test_files: 3,
            content_preview_chars: 1000,
            output_preview_chars: 500,
            command_timeout: Some(Duration::from_secs(1800)),
            bootstrap_sdk: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let timeout_secs: u64 = parse_or(
            &lookup,
            "TESTBENCH_COMMAND_TIMEOUT_SECS",
            defaults.command_timeout.map(|d| d.as_secs()).unwrap_or(0),
        )?;

        Ok(Self {
            checkout_root: lookup("TESTBENCH_CHECKOUT_ROOT").unwrap_or(defaults.checkout_root),
            script_dir: lookup("TESTBENCH_SCRIPT_DIR").unwrap_or(defaults.script_dir),
            analysis_script_path: defaults.analysis_script_path,
            install_script_path: defaults.install_script_path,
            install_retries: parse_or(&lookup, "TESTBENCH_INSTALL_RETRIES", defaults.install_retries)?,
            max_test_files: defaults.max_test_files,
            content_preview_chars: defaults.content_preview_chars,
            output_preview_chars: defaults.output_preview_chars,
            command_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            bootstrap_sdk: parse_bool(&lookup, "TESTBENCH_BOOTSTRAP_SDK", defaults.bootstrap_sdk)?,
        })
    }

    pub fn test_script_path(&self) -> String {
        format!("{}/run_tests.sh", self.script_dir.trim_end_matches('/'))
    }
}

/// Container host settings for provisioning.
#[derive(Debug, Clone, PartialEq)]
pub struct DockerHostConfig {
    pub docker_bin: String,
    pub image: String,
    pub memory_limit: String,
    /// `user@host` to run docker through ssh; local daemon when `None`.
    pub ssh_target: Option<String>,
    pub name_prefix: String,
}

impl Default for DockerHostConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            image: "python:3.13-alpine".to_string(),
            memory_limit: "2g".to_string(),
            ssh_target: None,
            name_prefix: "testbench".to_string(),
        }
    }
}

impl DockerHostConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            docker_bin: lookup("TESTBENCH_DOCKER_BIN").unwrap_or(defaults.docker_bin),
            image: lookup("TESTBENCH_IMAGE").unwrap_or(defaults.image),
            memory_limit: lookup("TESTBENCH_MEMORY").unwrap_or(defaults.memory_limit),
            ssh_target: lookup("TESTBENCH_SSH_TARGET").filter(|s| !s.trim().is_empty()),
            name_prefix: defaults.name_prefix,
        })
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub concurrency: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { concurrency: 10 }
    }
}

impl PoolConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let concurrency: usize = parse_or(&lookup, "TESTBENCH_CONCURRENCY", 10)?;
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "TESTBENCH_CONCURRENCY",
                value: "0".to_string(),
            });
        }
        Ok(Self { concurrency })
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(key) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value: raw }),
        },
        None => Ok(default),
    }
}
