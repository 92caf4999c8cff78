//! Bounded collection store
//!
//! Both raw posts and derived feed entries live in collections that support
//! idempotent upsert, a max-sequence query and count-based eviction. MongoDB
//! is the production backend; [`MemoryCollection`] mirrors it for tests and
//! local runs.

pub mod memory;
pub mod mongo;
pub mod schemas;

use async_trait::async_trait;
use bson::Document;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use mongodb::options::IndexOptions;

use crate::types::Result;

pub use memory::MemoryCollection;
pub use mongo::{MongoClient, MongoCollection};

/// Eviction deletes at most this many ids per round trip
pub const CUTOFF_BATCH_SIZE: usize = 10_000;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Accessors every stored record exposes
pub trait StoredDocument {
    /// Primary key, used as the upsert key
    fn id(&self) -> &str;
    fn sequence(&self) -> i64;
    fn created_at(&self) -> DateTime<Utc>;
}

/// A persisted, count-bounded collection of documents
#[async_trait]
pub trait Collection<T>: Send + Sync
where
    T: StoredDocument + Send + Sync + 'static,
{
    /// Store documents.
    ///
    /// With `overwrite` an existing document with the same id is replaced,
    /// otherwise the write fails for that document. Every document of a batch
    /// is attempted even when some of them fail.
    async fn insert(&self, overwrite: bool, docs: Vec<T>) -> Result<()>;

    /// Highest stored sequence, `None` for an empty collection
    async fn max_sequence(&self) -> Result<Option<i64>>;

    /// Delete the oldest documents (by `created_at`) until at most
    /// `max_documents` remain. Returns the number deleted.
    async fn cutoff_by_count(&self, max_documents: u64) -> Result<u64>;

    async fn count(&self) -> Result<u64>;

    /// Newest-first page, skipping `skip` documents
    async fn find_newest(&self, skip: u64, limit: u64) -> Result<Vec<T>>;

    /// Every document with `sequence > after` (all of them for `None`),
    /// ascending by sequence
    async fn scan(&self, after: Option<i64>) -> Result<BoxStream<'static, Result<T>>>;
}
