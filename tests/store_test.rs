//! Collection backend tests
//!
//! One set of checks runs against every `Collection` backend. The in-memory
//! store is always exercised; MongoDB joins in when `MONGODB_TEST_URI` points
//! at a disposable server (for example `mongodb://localhost:27017`).

use std::collections::HashSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::Url;

use feedgen::config::MongoArgs;
use feedgen::db::schemas::FeedEntry;
use feedgen::db::{Collection, MemoryCollection, MongoClient};
use feedgen::types::FeedgenError;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn entry(id: &str, sequence: i64, created_at: DateTime<Utc>) -> FeedEntry {
    FeedEntry {
        id: id.to_string(),
        sequence,
        did: "did:plc:author".to_string(),
        record_key: id.to_string(),
        created_at,
    }
}

/// Connection settings from `MONGODB_TEST_URI`, if set
fn mongo_args() -> Option<MongoArgs> {
    let raw = std::env::var("MONGODB_TEST_URI").ok()?;
    let url = Url::parse(&raw).ok()?;
    Some(MongoArgs {
        mongodb_host: url.host_str().map(str::to_string),
        mongodb_port: Some(url.port().unwrap_or(27017)),
        mongodb_username: (!url.username().is_empty()).then(|| url.username().to_string()),
        mongodb_password: url.password().map(str::to_string),
        mongodb_db: "feedgen_test".to_string(),
    })
}

async fn with_mongo<F, Fut>(check: F)
where
    F: FnOnce(Box<dyn Collection<FeedEntry>>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let Some(args) = mongo_args() else {
        eprintln!("MONGODB_TEST_URI not set, skipping MongoDB run");
        return;
    };
    let client = MongoClient::connect(&args).await.unwrap();
    let name = format!("feed_test_{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
    let store = client.collection::<FeedEntry>(&name).await.unwrap();
    check(Box::new(store)).await;
}

// =============================================================================
// Shared checks
// =============================================================================

async fn check_empty_store(store: &dyn Collection<FeedEntry>) {
    assert_eq!(store.count().await.unwrap(), 0);
    assert_eq!(store.max_sequence().await.unwrap(), None);
    assert!(store.find_newest(0, 10).await.unwrap().is_empty());
    assert_eq!(store.cutoff_by_count(0).await.unwrap(), 0);
}

async fn check_upsert_and_duplicates(store: &dyn Collection<FeedEntry>) {
    let t = base_time();
    store
        .insert(false, vec![entry("a", 1, t), entry("b", 2, t)])
        .await
        .unwrap();
    assert_eq!(store.max_sequence().await.unwrap(), Some(2));

    // Plain insert refuses existing ids but still writes the new one
    let err = store
        .insert(false, vec![entry("a", 1, t), entry("b", 2, t), entry("c", 3, t)])
        .await
        .unwrap_err();
    match err {
        FeedgenError::BulkWrite { failed, total, .. } => {
            assert_eq!(failed, 2);
            assert_eq!(total, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(store.count().await.unwrap(), 3);

    // Overwrite replaces in place
    store
        .insert(true, vec![entry("a", 10, t), entry("b", 2, t)])
        .await
        .unwrap();
    assert_eq!(store.count().await.unwrap(), 3);
    assert_eq!(store.max_sequence().await.unwrap(), Some(10));
}

/// Five entries sharing one timestamp, paged one at a time
async fn check_tied_timestamps_page_once(store: &dyn Collection<FeedEntry>) {
    let t = base_time();
    let ids = ["e", "c", "a", "d", "b"];
    let docs = ids
        .iter()
        .enumerate()
        .map(|(n, id)| entry(id, n as i64 + 1, t))
        .collect();
    store.insert(true, docs).await.unwrap();
    store
        .insert(true, vec![entry("newest", 99, t + Duration::minutes(1))])
        .await
        .unwrap();

    let mut seen = Vec::new();
    for skip in 0..7 {
        seen.extend(
            store
                .find_newest(skip, 1)
                .await
                .unwrap()
                .into_iter()
                .map(|doc| doc.id),
        );
    }
    assert_eq!(seen, vec!["newest", "a", "b", "c", "d", "e"]);
}

async fn check_cutoff_evicts_oldest(store: &dyn Collection<FeedEntry>) {
    let t = base_time();
    let docs = (1..=12)
        .map(|n| entry(&format!("doc{n:02}"), n, t + Duration::minutes(n)))
        .collect();
    store.insert(true, docs).await.unwrap();

    assert_eq!(store.cutoff_by_count(12).await.unwrap(), 0);
    assert_eq!(store.cutoff_by_count(5).await.unwrap(), 7);
    assert_eq!(store.count().await.unwrap(), 5);

    let kept: HashSet<String> = store
        .find_newest(0, 100)
        .await
        .unwrap()
        .into_iter()
        .map(|doc| doc.id)
        .collect();
    let expected: HashSet<String> = (8..=12).map(|n| format!("doc{n:02}")).collect();
    assert_eq!(kept, expected);
    assert_eq!(store.max_sequence().await.unwrap(), Some(12));

    assert_eq!(store.cutoff_by_count(0).await.unwrap(), 5);
    assert_eq!(store.count().await.unwrap(), 0);
}

async fn check_scan_after_sequence(store: &dyn Collection<FeedEntry>) {
    use futures::TryStreamExt;

    let t = base_time();
    let docs = [3, 1, 4, 2]
        .into_iter()
        .map(|n| entry(&format!("s{n}"), n, t))
        .collect();
    store.insert(true, docs).await.unwrap();

    let all: Vec<i64> = store
        .scan(None)
        .await
        .unwrap()
        .map_ok(|doc| doc.sequence)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(all, vec![1, 2, 3, 4]);

    let after: Vec<i64> = store
        .scan(Some(2))
        .await
        .unwrap()
        .map_ok(|doc| doc.sequence)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(after, vec![3, 4]);
}

// =============================================================================
// In-memory backend
// =============================================================================

#[tokio::test]
async fn test_memory_empty_store() {
    check_empty_store(&MemoryCollection::<FeedEntry>::new("feed")).await;
}

#[tokio::test]
async fn test_memory_upsert_and_duplicates() {
    check_upsert_and_duplicates(&MemoryCollection::<FeedEntry>::new("feed")).await;
}

#[tokio::test]
async fn test_memory_tied_timestamps_page_once() {
    check_tied_timestamps_page_once(&MemoryCollection::<FeedEntry>::new("feed")).await;
}

#[tokio::test]
async fn test_memory_cutoff_evicts_oldest() {
    check_cutoff_evicts_oldest(&MemoryCollection::<FeedEntry>::new("feed")).await;
}

#[tokio::test]
async fn test_memory_scan_after_sequence() {
    check_scan_after_sequence(&MemoryCollection::<FeedEntry>::new("feed")).await;
}

// =============================================================================
// MongoDB backend
// =============================================================================

#[tokio::test]
async fn test_mongo_empty_store() {
    with_mongo(|store| async move { check_empty_store(store.as_ref()).await }).await;
}

#[tokio::test]
async fn test_mongo_upsert_and_duplicates() {
    with_mongo(|store| async move { check_upsert_and_duplicates(store.as_ref()).await }).await;
}

#[tokio::test]
async fn test_mongo_tied_timestamps_page_once() {
    with_mongo(|store| async move { check_tied_timestamps_page_once(store.as_ref()).await }).await;
}

#[tokio::test]
async fn test_mongo_cutoff_evicts_oldest() {
    with_mongo(|store| async move {
        check_cutoff_evicts_oldest(store.as_ref()).await;
        check_empty_store(store.as_ref()).await;
    })
    .await;
}

#[tokio::test]
async fn test_mongo_scan_after_sequence() {
    with_mongo(|store| async move { check_scan_after_sequence(store.as_ref()).await }).await;
}
