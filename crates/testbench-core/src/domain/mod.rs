//! Domain models for testbench.
//!
//! Canonical definitions for the values that flow through one run:
//! - `RepositoryAnalysis`: detected languages, manifests and test locations
//! - `TestFile` / `RawTestRunResult`: discovered tests and raw runner output
//! - `CanonicalResult`: the fixed-shape record every run produces

pub mod analysis;
pub mod error;
pub mod result;
pub mod test_run;

pub use analysis::RepositoryAnalysis;
pub use error::{ConfigError, Result, TestbenchError};
pub use result::{
    CanonicalResult, IntegrationTest, IntegrationTestRun, RepoInfo, RunOutput, REQUIRED_GROUPS,
    UNKNOWN_COMMIT,
};
pub use test_run::{RawTestRunResult, TestFile, TestRunOutput};
