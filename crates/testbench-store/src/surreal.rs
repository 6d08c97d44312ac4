//! SurrealDB-backed `ResultStore`
//!
//! Supports in-memory (`mem://`), embedded file (`surrealkv://path`) and
//! remote (`ws://`, `wss://`) endpoints through the `any` engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use testbench_core::CanonicalResult;
use tracing::{debug, info, instrument};

use crate::error::StoreError;
use crate::record::StoredResult;
use crate::{Result, ResultStore};

const NAMESPACE: &str = "testbench";
const DATABASE: &str = "main";
const TABLE: &str = "results";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbStoredResult {
    digest: String,
    remote_url: String,
    passed: bool,
    record: CanonicalResult,
    saved_at: SurrealDatetime,
}

impl DbStoredResult {
    fn from_stored(stored: StoredResult) -> Self {
        Self {
            digest: stored.id,
            remote_url: stored.remote_url,
            passed: stored.passed,
            record: stored.record,
            saved_at: SurrealDatetime::from(stored.saved_at),
        }
    }

    fn into_stored(self) -> StoredResult {
        StoredResult {
            id: self.digest,
            remote_url: self.remote_url,
            passed: self.passed,
            record: self.record,
            saved_at: DateTime::<Utc>::from(self.saved_at),
        }
    }
}

/// SurrealDB connection holding the `results` table
#[derive(Clone)]
pub struct SurrealResultStore {
    db: Surreal<Any>,
}

impl SurrealResultStore {
    /// Connect to an in-memory database and set up the schema
    #[instrument(skip_all)]
    pub async fn setup_db() -> Result<Self> {
        Self::connect("mem://").await
    }

    /// Connect to `SURREALDB_URL` when set, otherwise in-memory
    #[instrument(skip_all)]
    pub async fn setup_from_env() -> Result<Self> {
        match std::env::var("SURREALDB_URL") {
            Ok(url) if !url.trim().is_empty() => {
                info!("SURREALDB_URL found, connecting to {}", url);
                Self::connect(&url).await
            }
            _ => {
                info!("No SURREALDB_URL set, using in-memory database");
                Self::setup_db().await
            }
        }
    }

    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let db = surrealdb::engine::any::connect(endpoint)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to {}: {}", endpoint, e)))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = SurrealResultStore { db };
        store.init_schema().await?;

        info!("SurrealDB connected and schema initialized");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        debug!("Initializing results schema");

        let schema = r#"
            DEFINE TABLE results SCHEMAFULL;
            DEFINE FIELD digest ON results TYPE string;
            DEFINE FIELD remote_url ON results TYPE string;
            DEFINE FIELD passed ON results TYPE bool;
            DEFINE FIELD record ON results FLEXIBLE TYPE object;
            DEFINE FIELD saved_at ON results TYPE datetime;
            DEFINE INDEX idx_results_digest ON results FIELDS digest;
            DEFINE INDEX idx_results_url_saved ON results FIELDS remote_url, saved_at;
        "#;

        self.db
            .query(schema)
            .await
            .map_err(|e| StoreError::SchemaSetup(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ResultStore for SurrealResultStore {
    #[instrument(skip(self, record), fields(remote_url = %record.remote_url()))]
    async fn save(&self, record: &CanonicalResult) -> Result<String> {
        let stored = StoredResult::new(record.clone())?;
        let id = stored.id.clone();

        let created: Option<DbStoredResult> = self
            .db
            .create(TABLE)
            .content(DbStoredResult::from_stored(stored))
            .await?;
        if created.is_none() {
            return Err(StoreError::EmptyWrite(TABLE));
        }

        debug!(id = %&id[..12], "result saved");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn latest_for(&self, remote_url: &str) -> Result<Option<StoredResult>> {
        let url_owned = remote_url.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM results WHERE remote_url = $url ORDER BY saved_at DESC LIMIT 1")
            .bind(("url", url_owned))
            .await?;

        let rows: Vec<DbStoredResult> = result.take(0)?;
        Ok(rows.into_iter().next().map(DbStoredResult::into_stored))
    }

    #[instrument(skip(self))]
    async fn list(&self, limit: usize) -> Result<Vec<StoredResult>> {
        let mut result = self
            .db
            .query(format!(
                "SELECT * FROM results ORDER BY saved_at DESC LIMIT {limit}"
            ))
            .await?;

        let rows: Vec<DbStoredResult> = result.take(0)?;
        Ok(rows.into_iter().map(DbStoredResult::into_stored).collect())
    }
}
