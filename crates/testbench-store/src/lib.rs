//! Testbench-Store: persistence for canonical test-run results
//!
//! ## Key Components
//!
//! - `ResultStore`: the persistence seam the CLI writes through
//! - `MemoryResultStore`: in-process fake for tests
//! - `SurrealResultStore`: SurrealDB backend (in-memory, file or remote)

mod error;
pub mod fakes;
mod record;
mod surreal;

use async_trait::async_trait;
use testbench_core::CanonicalResult;

pub use error::StoreError;
pub use fakes::MemoryResultStore;
pub use record::{record_digest, StoredResult};
pub use surreal::SurrealResultStore;

/// Result type for testbench-store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Append-only store of canonical results.
///
/// Guarantees:
/// - `save` returns the record's content digest.
/// - `latest_for` and `list` return the newest entries first.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save(&self, record: &CanonicalResult) -> Result<String>;

    async fn latest_for(&self, remote_url: &str) -> Result<Option<StoredResult>>;

    async fn list(&self, limit: usize) -> Result<Vec<StoredResult>>;
}
