//! Stored form of a canonical result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use testbench_core::CanonicalResult;

use crate::Result;

/// A canonical result as persisted, newest-first listings sort on `saved_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    /// SHA-256 of the record's JSON encoding.
    pub id: String,
    pub remote_url: String,
    pub passed: bool,
    pub record: CanonicalResult,
    pub saved_at: DateTime<Utc>,
}

impl StoredResult {
    pub fn new(record: CanonicalResult) -> Result<Self> {
        Ok(Self {
            id: record_digest(&record)?,
            remote_url: record.remote_url().to_string(),
            passed: record.passed(),
            record,
            saved_at: Utc::now(),
        })
    }

    /// First 12 hex chars of the id.
    pub fn short_id(&self) -> &str {
        &self.id[..12.min(self.id.len())]
    }
}

/// Content digest of a record. Identical records share an id.
pub fn record_digest(record: &CanonicalResult) -> Result<String> {
    let bytes = serde_json::to_vec(record)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}
