//! The canonical run record handed to callers and persistence.
//!
//! Field names and nesting are a compatibility contract:
//!
//! ```text
//! {
//!   "Repo": {"remoteUrl": string, "languages": [string]},
//!   "IntegrationTest": {"fileContent": string},
//!   "IntegrationTestRun": {
//!     "commitId": string,
//!     "result": {"stdout": string, "stderr": string, "returnCode": int},
//!     "pass": bool
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Top-level groups every record must carry.
pub const REQUIRED_GROUPS: [&str; 3] = ["Repo", "IntegrationTest", "IntegrationTestRun"];

/// Commit id placeholder when the checkout's HEAD could not be determined.
pub const UNKNOWN_COMMIT: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalResult {
    #[serde(rename = "Repo")]
    pub repo: RepoInfo,

    #[serde(rename = "IntegrationTest")]
    pub integration_test: IntegrationTest,

    #[serde(rename = "IntegrationTestRun")]
    pub integration_test_run: IntegrationTestRun,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoInfo {
    #[serde(default)]
    pub remote_url: String,

    #[serde(default)]
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationTest {
    #[serde(default)]
    pub file_content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationTestRun {
    #[serde(default)]
    pub commit_id: String,

    #[serde(default)]
    pub result: RunOutput,

    #[serde(default)]
    pub pass: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    #[serde(default)]
    pub stdout: String,

    #[serde(default)]
    pub stderr: String,

    #[serde(default)]
    pub return_code: i64,
}

impl CanonicalResult {
    /// Record for a run that did not reach test execution.
    ///
    /// The cause becomes `stderr`; `returnCode` is 1 and `pass` is false.
    pub fn failure(
        remote_url: impl Into<String>,
        languages: Vec<String>,
        commit_id: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            repo: RepoInfo {
                remote_url: remote_url.into(),
                languages,
            },
            integration_test: IntegrationTest::default(),
            integration_test_run: IntegrationTestRun {
                commit_id: commit_id.into(),
                result: RunOutput {
                    stdout: String::new(),
                    stderr: cause.into(),
                    return_code: 1,
                },
                pass: false,
            },
        }
    }

    pub fn passed(&self) -> bool {
        self.integration_test_run.pass
    }

    pub fn remote_url(&self) -> &str {
        &self.repo.remote_url
    }
}
