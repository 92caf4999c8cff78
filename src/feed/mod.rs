//! Feed capability and reader
//!
//! A [`Feed`] names itself, describes its `at://` URI and serves pages of
//! post references. The HTTP layer only ever sees feeds through a
//! [`FeedRegistry`], so new rulesets plug in without touching it.
//!
//! Pagination is offset based: the cursor counts entries already returned.
//! Entries inserted ahead of a reader's position shift the window, so pages
//! taken while the feed is being written can overlap or skip entries.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::error;

use crate::db::schemas::FeedEntry;
use crate::db::Collection;
use crate::generator::ClassificationRuleset;
use crate::types::{FeedgenError, ReadCursor, Result};

/// Page size when the caller gives none or an invalid one
pub const DEFAULT_PAGE_LIMIT: u64 = 50;

/// Largest page a caller can ask for
pub const MAX_PAGE_LIMIT: u64 = 100;

/// Normalized page size, always within `1..=100`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimit(u64);

impl PageLimit {
    /// Parse the `limit` query value; anything absent, non-numeric or out of
    /// range falls back to the default
    pub fn parse(raw: Option<&str>) -> Self {
        raw.and_then(|value| value.trim().parse::<u64>().ok())
            .map(Self::clamp)
            .unwrap_or_default()
    }

    fn clamp(value: u64) -> Self {
        if (1..=MAX_PAGE_LIMIT).contains(&value) {
            Self(value)
        } else {
            Self::default()
        }
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl Default for PageLimit {
    fn default() -> Self {
        Self(DEFAULT_PAGE_LIMIT)
    }
}

impl From<u64> for PageLimit {
    fn from(value: u64) -> Self {
        Self::clamp(value)
    }
}

/// Entry of `describeFeedGenerator`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FeedDescription {
    pub uri: String,
}

/// One skeleton item
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkeletonItem {
    pub post: String,
}

/// `getFeedSkeleton` response body
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkeletonPage {
    pub feed: Vec<SkeletonItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// A servable feed
#[async_trait]
pub trait Feed: Send + Sync {
    /// Short name, the last path segment of the feed URI
    fn name(&self) -> &str;

    fn describe(&self) -> FeedDescription;

    /// One page of post references, newest first. `requester` is the
    /// authenticated caller's DID, if any.
    async fn get_page(
        &self,
        requester: Option<&str>,
        limit: PageLimit,
        cursor: ReadCursor,
    ) -> Result<SkeletonPage>;

    /// Ruleset behind the feed, when it is generated from one
    fn ruleset(&self) -> Option<&ClassificationRuleset> {
        None
    }
}

/// `at://<publisher>/app.bsky.feed.generator/<name>`
pub fn feed_uri(publisher_did: &str, name: &str) -> String {
    format!("at://{}/app.bsky.feed.generator/{}", publisher_did, name)
}

/// Feed served from a collection of [`FeedEntry`] documents
pub struct CollectionFeed {
    name: String,
    publisher_did: String,
    entries: Arc<dyn Collection<FeedEntry>>,
    ruleset: Option<Arc<ClassificationRuleset>>,
}

impl CollectionFeed {
    pub fn new(
        name: impl Into<String>,
        publisher_did: impl Into<String>,
        entries: Arc<dyn Collection<FeedEntry>>,
    ) -> Self {
        Self {
            name: name.into(),
            publisher_did: publisher_did.into(),
            entries,
            ruleset: None,
        }
    }

    pub fn with_ruleset(mut self, ruleset: Arc<ClassificationRuleset>) -> Self {
        self.ruleset = Some(ruleset);
        self
    }
}

#[async_trait]
impl Feed for CollectionFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> FeedDescription {
        FeedDescription {
            uri: feed_uri(&self.publisher_did, &self.name),
        }
    }

    async fn get_page(
        &self,
        _requester: Option<&str>,
        limit: PageLimit,
        cursor: ReadCursor,
    ) -> Result<SkeletonPage> {
        let limit = limit.get();
        // One extra entry tells whether another page exists
        let mut entries = self
            .entries
            .find_newest(cursor.offset(), limit + 1)
            .await
            .map_err(|e| {
                error!(feed = %self.name, error = %e, "Failed to read feed entries");
                FeedgenError::Internal(format!("feed read failed: {}", e))
            })?;

        let next = if entries.len() as u64 > limit {
            entries.truncate(limit as usize);
            Some(cursor.advance(limit).to_string())
        } else {
            None
        };

        Ok(SkeletonPage {
            feed: entries
                .iter()
                .map(|entry| SkeletonItem {
                    post: entry.post_uri(),
                })
                .collect(),
            cursor: next,
        })
    }

    fn ruleset(&self) -> Option<&ClassificationRuleset> {
        self.ruleset.as_deref()
    }
}

/// Feeds by name, in registration order
#[derive(Default, Clone)]
pub struct FeedRegistry {
    feeds: Vec<Arc<dyn Feed>>,
    by_name: HashMap<String, usize>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a feed; a later feed with the same name replaces the earlier one
    pub fn register(&mut self, feed: Arc<dyn Feed>) {
        match self.by_name.get(feed.name()) {
            Some(&index) => self.feeds[index] = feed,
            None => {
                self.by_name.insert(feed.name().to_string(), self.feeds.len());
                self.feeds.push(feed);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Feed>> {
        self.by_name.get(name).map(|&index| Arc::clone(&self.feeds[index]))
    }

    /// Find the feed named by the last path segment of a feed URI
    pub fn resolve(&self, feed_param: Option<&str>) -> Result<Arc<dyn Feed>> {
        let feed_param = feed_param.unwrap_or_default();
        if feed_param.is_empty() {
            return Err(FeedgenError::BadRequest(
                "feed query parameter is required".into(),
            ));
        }
        let Some((_, name)) = feed_param.rsplit_once('/') else {
            return Err(FeedgenError::BadRequest(
                "feed query parameter is invalid".into(),
            ));
        };
        self.get(name)
            .ok_or_else(|| FeedgenError::NotFound("feed not found".into()))
    }

    pub fn describe(&self) -> Vec<FeedDescription> {
        self.feeds.iter().map(|feed| feed.describe()).collect()
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryCollection;
    use chrono::{Duration, TimeZone, Utc};

    async fn feed_with(n: i64) -> CollectionFeed {
        let collection: MemoryCollection<FeedEntry> = MemoryCollection::new("feed_test");
        let entries = (1..=n)
            .map(|i| FeedEntry {
                id: format!("did:plc:author/{i}"),
                sequence: i,
                did: "did:plc:author".to_string(),
                record_key: i.to_string(),
                created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
                    + Duration::minutes(i),
            })
            .collect();
        collection.insert(true, entries).await.unwrap();
        CollectionFeed::new("AzPulse", "did:plc:publisher", Arc::new(collection))
    }

    #[test]
    fn test_page_limit_bounds() {
        assert_eq!(PageLimit::parse(None).get(), 50);
        assert_eq!(PageLimit::parse(Some("1")).get(), 1);
        assert_eq!(PageLimit::parse(Some("100")).get(), 100);
        assert_eq!(PageLimit::parse(Some("0")).get(), 50);
        assert_eq!(PageLimit::parse(Some("101")).get(), 50);
        assert_eq!(PageLimit::parse(Some("-5")).get(), 50);
        assert_eq!(PageLimit::parse(Some("ten")).get(), 50);
    }

    #[tokio::test]
    async fn test_pages_of_five_entry_feed() {
        let feed = feed_with(5).await;

        let first = feed
            .get_page(None, PageLimit::from(2), ReadCursor::parse(Some("")).unwrap())
            .await
            .unwrap();
        assert_eq!(first.feed.len(), 2);
        assert_eq!(first.cursor.as_deref(), Some("2"));
        assert_eq!(first.feed[0].post, "at://did:plc:author/app.bsky.feed.post/5");

        let last = feed
            .get_page(None, PageLimit::from(2), ReadCursor::parse(Some("4")).unwrap())
            .await
            .unwrap();
        assert_eq!(last.feed.len(), 1);
        assert_eq!(last.cursor, None);
        assert_eq!(last.feed[0].post, "at://did:plc:author/app.bsky.feed.post/1");
    }

    #[tokio::test]
    async fn test_exact_last_page_has_no_cursor() {
        let feed = feed_with(4).await;
        let page = feed
            .get_page(None, PageLimit::from(2), ReadCursor(2))
            .await
            .unwrap();
        assert_eq!(page.feed.len(), 2);
        assert!(page.cursor.is_none());
    }

    #[tokio::test]
    async fn test_registry_resolves_last_segment() {
        let mut registry = FeedRegistry::new();
        registry.register(Arc::new(feed_with(1).await));

        let feed = registry
            .resolve(Some("at://did:plc:publisher/app.bsky.feed.generator/AzPulse"))
            .unwrap();
        assert_eq!(feed.name(), "AzPulse");
        assert_eq!(
            registry.describe()[0].uri,
            "at://did:plc:publisher/app.bsky.feed.generator/AzPulse"
        );

        let missing = registry.resolve(None).err().unwrap();
        assert!(matches!(missing, FeedgenError::BadRequest(m) if m == "feed query parameter is required"));
        let invalid = registry.resolve(Some("AzPulse")).err().unwrap();
        assert!(matches!(invalid, FeedgenError::BadRequest(m) if m == "feed query parameter is invalid"));
        let unknown = registry.resolve(Some("at://x/app.bsky.feed.generator/Other")).err().unwrap();
        assert!(matches!(unknown, FeedgenError::NotFound(_)));
    }
}
