//! In-memory collection
//!
//! Same semantics as [`MongoCollection`](super::MongoCollection), backed by a
//! `DashMap` keyed by document id. Used by tests and for running the API
//! without a database.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, warn};

use super::{Collection, StoredDocument, CUTOFF_BATCH_SIZE};
use crate::types::{FeedgenError, Result};

/// Thread-safe in-memory collection
pub struct MemoryCollection<T> {
    name: String,
    documents: DashMap<String, T>,
}

impl<T> MemoryCollection<T>
where
    T: StoredDocument + Clone,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: DashMap::new(),
        }
    }

    fn write_one(&self, overwrite: bool, item: T) -> Result<()> {
        match self.documents.entry(item.id().to_string()) {
            Entry::Occupied(mut existing) => {
                if !overwrite {
                    return Err(FeedgenError::Database(format!(
                        "duplicate key error: _id {}",
                        existing.key()
                    )));
                }
                existing.insert(item);
            }
            Entry::Vacant(slot) => {
                slot.insert(item);
            }
        }
        Ok(())
    }

    /// Snapshot of all documents in an unspecified order
    fn snapshot(&self) -> Vec<T> {
        self.documents.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[async_trait]
impl<T> Collection<T> for MemoryCollection<T>
where
    T: StoredDocument + Clone + Send + Sync + 'static,
{
    async fn insert(&self, overwrite: bool, docs: Vec<T>) -> Result<()> {
        let total = docs.len();
        if total == 1 {
            return docs
                .into_iter()
                .try_for_each(|item| self.write_one(overwrite, item));
        }

        let mut failures = Vec::new();
        for item in docs {
            let id = item.id().to_string();
            if let Err(error) = self.write_one(overwrite, item) {
                warn!(collection = %self.name, id = %id, error = %error, "Document write failed");
                failures.push(error);
            }
        }

        match failures.first() {
            None => Ok(()),
            Some(first) => Err(FeedgenError::BulkWrite {
                failed: failures.len(),
                total,
                first: first.to_string(),
            }),
        }
    }

    async fn max_sequence(&self) -> Result<Option<i64>> {
        Ok(self.documents.iter().map(|entry| entry.value().sequence()).max())
    }

    async fn cutoff_by_count(&self, max_documents: u64) -> Result<u64> {
        let count = self.documents.len() as u64;
        if count <= max_documents {
            return Ok(0);
        }
        let surplus = (count - max_documents) as usize;

        let mut oldest: Vec<(chrono::DateTime<chrono::Utc>, String)> = self
            .documents
            .iter()
            .map(|entry| (entry.value().created_at(), entry.key().clone()))
            .collect();
        oldest.sort();
        oldest.truncate(surplus);

        let mut deleted = 0;
        for batch in oldest.chunks(CUTOFF_BATCH_SIZE) {
            for (_, id) in batch {
                if self.documents.remove(id).is_some() {
                    deleted += 1;
                }
            }
        }

        debug!(collection = %self.name, surplus, deleted, "Cutoff finished");
        Ok(deleted)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.documents.len() as u64)
    }

    async fn find_newest(&self, skip: u64, limit: u64) -> Result<Vec<T>> {
        let mut documents = self.snapshot();
        // Ties broken by id so pages stay stable between calls
        documents.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(documents
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect())
    }

    async fn scan(&self, after: Option<i64>) -> Result<BoxStream<'static, Result<T>>> {
        let mut documents: Vec<T> = self
            .snapshot()
            .into_iter()
            .filter(|doc| after.map_or(true, |after| doc.sequence() > after))
            .collect();
        documents.sort_by(|a, b| {
            a.sequence()
                .cmp(&b.sequence())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(stream::iter(documents.into_iter().map(Ok)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::FeedEntry;
    use chrono::{Duration, TimeZone, Utc};

    fn entry(n: i64) -> FeedEntry {
        FeedEntry {
            id: format!("did:plc:test/{n}"),
            sequence: n,
            did: "did:plc:test".to_string(),
            record_key: n.to_string(),
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(n),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let collection: MemoryCollection<FeedEntry> = MemoryCollection::new("feed_test");
        collection.insert(true, vec![entry(1), entry(2)]).await.unwrap();
        collection.insert(true, vec![entry(1), entry(2)]).await.unwrap();
        assert_eq!(collection.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_insert_without_overwrite_reports_duplicates() {
        let collection: MemoryCollection<FeedEntry> = MemoryCollection::new("feed_test");
        collection.insert(false, vec![entry(1)]).await.unwrap();

        let err = collection
            .insert(false, vec![entry(1), entry(2), entry(3)])
            .await
            .unwrap_err();
        match err {
            FeedgenError::BulkWrite { failed, total, .. } => {
                assert_eq!(failed, 1);
                assert_eq!(total, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The non-conflicting documents were still written
        assert_eq!(collection.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_max_sequence_distinguishes_empty() {
        let collection: MemoryCollection<FeedEntry> = MemoryCollection::new("feed_test");
        assert_eq!(collection.max_sequence().await.unwrap(), None);

        let mut zero = entry(0);
        zero.id = "did:plc:test/zero".to_string();
        collection.insert(true, vec![zero]).await.unwrap();
        assert_eq!(collection.max_sequence().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_scan_is_ascending_after_cursor() {
        let collection: MemoryCollection<FeedEntry> = MemoryCollection::new("post_test");
        collection
            .insert(true, vec![entry(5), entry(1), entry(3), entry(4)])
            .await
            .unwrap();

        let seqs: Vec<i64> = collection
            .scan(Some(3))
            .await
            .unwrap()
            .map(|doc| doc.unwrap().sequence)
            .collect()
            .await;
        assert_eq!(seqs, vec![4, 5]);
    }
}
