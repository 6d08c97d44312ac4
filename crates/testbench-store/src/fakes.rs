//! In-memory `ResultStore` (testing only)

use std::sync::Mutex;

use async_trait::async_trait;
use testbench_core::CanonicalResult;

use crate::record::StoredResult;
use crate::{Result, ResultStore};

/// Results held in insertion order.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    entries: Mutex<Vec<StoredResult>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn save(&self, record: &CanonicalResult) -> Result<String> {
        let stored = StoredResult::new(record.clone())?;
        let id = stored.id.clone();
        self.entries.lock().unwrap().push(stored);
        Ok(id)
    }

    async fn latest_for(&self, remote_url: &str) -> Result<Option<StoredResult>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .rev()
            .find(|e| e.remote_url == remote_url)
            .cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<StoredResult>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}
