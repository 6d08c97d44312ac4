//! Contract tests run against every `ResultStore` implementation.

use std::time::Duration;

use testbench_core::CanonicalResult;
use testbench_store::{record_digest, MemoryResultStore, ResultStore, SurrealResultStore};

fn record(url: &str, cause: &str) -> CanonicalResult {
    CanonicalResult::failure(url, vec!["py".to_string()], "unknown", cause)
}

async fn save_returns_content_digest(store: &dyn ResultStore) {
    let rec = record("https://github.com/acme/a", "boom");
    let id = store.save(&rec).await.unwrap();
    assert_eq!(id, record_digest(&rec).unwrap());
}

async fn latest_for_returns_newest_of_that_repo(store: &dyn ResultStore) {
    store
        .save(&record("https://github.com/acme/b", "first"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    store
        .save(&record("https://github.com/acme/c", "other repo"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    store
        .save(&record("https://github.com/acme/b", "second"))
        .await
        .unwrap();

    let latest = store
        .latest_for("https://github.com/acme/b")
        .await
        .unwrap()
        .expect("a stored result");
    assert_eq!(latest.record.integration_test_run.result.stderr, "second");
    assert!(!latest.passed);

    assert!(store
        .latest_for("https://github.com/acme/missing")
        .await
        .unwrap()
        .is_none());
}

async fn list_is_newest_first_and_limited(store: &dyn ResultStore) {
    for cause in ["one", "two", "three"] {
        store
            .save(&record("https://github.com/acme/d", cause))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let listed = store.list(2).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].record.integration_test_run.result.stderr, "three");
    assert_eq!(listed[1].record.integration_test_run.result.stderr, "two");
}

#[tokio::test]
async fn memory_store_contract() {
    save_returns_content_digest(&MemoryResultStore::new()).await;
    latest_for_returns_newest_of_that_repo(&MemoryResultStore::new()).await;
    list_is_newest_first_and_limited(&MemoryResultStore::new()).await;
}

#[tokio::test]
async fn surreal_store_contract() {
    save_returns_content_digest(&SurrealResultStore::setup_db().await.unwrap()).await;
    latest_for_returns_newest_of_that_repo(&SurrealResultStore::setup_db().await.unwrap()).await;
    list_is_newest_first_and_limited(&SurrealResultStore::setup_db().await.unwrap()).await;
}

#[tokio::test]
async fn surreal_store_round_trips_full_record() {
    let store = SurrealResultStore::setup_db().await.unwrap();
    let mut rec = record("https://github.com/acme/e", "");
    rec.integration_test.file_content = "def test(): pass\n".repeat(200);
    rec.integration_test_run.pass = true;
    rec.integration_test_run.result.return_code = 0;

    store.save(&rec).await.unwrap();
    let stored = store
        .latest_for("https://github.com/acme/e")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.record, rec);
    assert!(stored.passed);
}
