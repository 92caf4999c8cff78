//! MongoDB client and collection wrapper
//!
//! Production backend of [`Collection`]. Indexes are created when a collection is opened.

use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use mongodb::{
    options::{ClientOptions, Credential},
    Client, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::{Collection, IntoIndexes, StoredDocument, CUTOFF_BATCH_SIZE};
use crate::config::MongoArgs;
use crate::types::{FeedgenError, Result};

/// Bound on connecting and the initial ping
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Concurrent writes issued for one multi-document insert
const WRITE_CONCURRENCY: usize = 32;

/// Page order for reads. `_id` breaks ties so skip/limit pages never overlap.
fn newest_first() -> Document {
    doc! { "created_at": -1, "_id": 1 }
}

/// Eviction order, oldest first with the same tie-break
fn oldest_first() -> Document {
    doc! { "created_at": 1, "_id": 1 }
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and verify the connection with a ping, within 10 seconds
    pub async fn connect(args: &MongoArgs) -> Result<Self> {
        let uri = args.uri();
        info!("Connecting to MongoDB at {}", uri);

        let mut options = ClientOptions::parse(&uri)
            .await
            .map_err(|e| FeedgenError::Database(format!("Invalid MongoDB URI: {}", e)))?;
        options.app_name = Some("feedgen".to_string());
        options.server_selection_timeout = Some(CONNECT_TIMEOUT);
        options.connect_timeout = Some(CONNECT_TIMEOUT);
        if let Some((username, password)) = args.credentials() {
            options.credential = Some(
                Credential::builder()
                    .username(username.to_string())
                    .password(password.to_string())
                    .build(),
            );
        }

        let client = Client::with_options(options)
            .map_err(|e| FeedgenError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        let database = client.database(&args.mongodb_db);
        let ping = database.run_command(doc! { "ping": 1 });
        tokio::time::timeout(CONNECT_TIMEOUT, ping)
            .await
            .map_err(|_| FeedgenError::Timeout("MongoDB ping".to_string()))?
            .map_err(|e| FeedgenError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", args.mongodb_db);

        Ok(Self {
            client,
            db_name: args.mongodb_db.clone(),
        })
    }

    /// Get a typed collection, creating its indexes
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Send + Sync,
{
    inner: mongodb::Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
{
    /// Open a collection and apply indexes
    pub async fn new(client: &Client, db_name: &str, collection_name: &str) -> Result<Self> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<()> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| FeedgenError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }
}

impl<T> MongoCollection<T>
where
    T: Send + Sync,
{
    /// Collection name
    pub fn name(&self) -> &str {
        self.inner.name()
    }
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + StoredDocument,
{
    async fn write_one(&self, overwrite: bool, item: &T) -> Result<()> {
        if overwrite {
            self.inner
                .replace_one(doc! { "_id": item.id() }, item)
                .upsert(true)
                .await?;
        } else {
            self.inner.insert_one(item).await?;
        }
        Ok(())
    }

    async fn delete_ids(&self, ids: Vec<Bson>) -> Result<u64> {
        let result = self
            .inner
            .delete_many(doc! { "_id": { "$in": ids } })
            .await?;
        Ok(result.deleted_count)
    }
}

#[async_trait]
impl<T> Collection<T> for MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + StoredDocument + 'static,
{
    async fn insert(&self, overwrite: bool, docs: Vec<T>) -> Result<()> {
        match docs.len() {
            0 => Ok(()),
            1 => self.write_one(overwrite, &docs[0]).await,
            total => {
                let writes: Vec<_> = docs
                    .iter()
                    .map(|item| async move {
                        self.write_one(overwrite, item)
                            .await
                            .map_err(|e| (item.id().to_string(), e))
                    })
                    .collect();
                let failures: Vec<(String, FeedgenError)> = stream::iter(writes)
                    .buffer_unordered(WRITE_CONCURRENCY)
                    .filter_map(|outcome| async move { outcome.err() })
                    .collect()
                    .await;

                if failures.is_empty() {
                    return Ok(());
                }
                for (id, error) in &failures {
                    warn!(collection = %self.name(), id = %id, error = %error, "Document write failed");
                }
                Err(FeedgenError::BulkWrite {
                    failed: failures.len(),
                    total,
                    first: failures[0].1.to_string(),
                })
            }
        }
    }

    async fn max_sequence(&self) -> Result<Option<i64>> {
        let pipeline = vec![doc! {
            "$group": { "_id": Bson::Null, "max_sequence": { "$max": "$sequence" } }
        }];
        let mut cursor = self.inner.aggregate(pipeline).await?;

        let Some(result) = cursor.try_next().await? else {
            return Ok(None);
        };
        Ok(match result.get("max_sequence") {
            Some(Bson::Int64(v)) => Some(*v),
            Some(Bson::Int32(v)) => Some(i64::from(*v)),
            Some(Bson::Double(v)) => Some(*v as i64),
            _ => None,
        })
    }

    async fn cutoff_by_count(&self, max_documents: u64) -> Result<u64> {
        let count = self.count().await?;
        if count <= max_documents {
            return Ok(0);
        }
        let surplus = count - max_documents;

        let ids = self.inner.clone_with_type::<Document>();
        let mut cursor = ids
            .find(doc! {})
            .sort(oldest_first())
            .limit(surplus as i64)
            .projection(doc! { "_id": 1 })
            .await?;

        let mut deleted = 0;
        let mut batch: Vec<Bson> = Vec::with_capacity(CUTOFF_BATCH_SIZE.min(surplus as usize));
        while let Some(found) = cursor.try_next().await? {
            if let Some(id) = found.get("_id") {
                batch.push(id.clone());
            }
            if batch.len() >= CUTOFF_BATCH_SIZE {
                deleted += self.delete_ids(std::mem::take(&mut batch)).await?;
            }
        }
        if !batch.is_empty() {
            deleted += self.delete_ids(batch).await?;
        }

        debug!(collection = %self.name(), surplus, deleted, "Cutoff finished");
        Ok(deleted)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.inner.count_documents(doc! {}).await?)
    }

    async fn find_newest(&self, skip: u64, limit: u64) -> Result<Vec<T>> {
        let cursor = self
            .inner
            .find(doc! {})
            .sort(newest_first())
            .skip(skip)
            .limit(limit as i64)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn scan(&self, after: Option<i64>) -> Result<BoxStream<'static, Result<T>>> {
        let filter = match after {
            Some(sequence) => doc! { "sequence": { "$gt": sequence } },
            None => doc! {},
        };
        let cursor = self
            .inner
            .find(filter)
            .sort(doc! { "sequence": 1 })
            .await?;
        Ok(cursor.map_err(FeedgenError::from).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_orders_break_ties_by_id() {
        assert_eq!(newest_first(), doc! { "created_at": -1, "_id": 1 });
        assert_eq!(oldest_first(), doc! { "created_at": 1, "_id": 1 });

        let keys: Vec<String> = newest_first().keys().cloned().collect();
        assert_eq!(keys, vec!["created_at", "_id"]);
    }
}
