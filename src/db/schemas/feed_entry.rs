//! Feed entry document schema
//!
//! A minimal projection of a [`RawPost`] that passed a feed's ruleset.
//! One collection per feed (e.g. `feed_az`).

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::{IntoIndexes, StoredDocument};

use super::RawPost;

/// Feed entry document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FeedEntry {
    /// Copied from the source post
    #[serde(rename = "_id")]
    pub id: String,

    pub sequence: i64,

    pub did: String,

    pub record_key: String,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl FeedEntry {
    /// `at://` URI of the post this entry points at
    pub fn post_uri(&self) -> String {
        format!("at://{}/app.bsky.feed.post/{}", self.did, self.record_key)
    }
}

impl From<&RawPost> for FeedEntry {
    fn from(post: &RawPost) -> Self {
        Self {
            id: post.id.clone(),
            sequence: post.sequence,
            did: post.did.clone(),
            record_key: post.record_key.clone(),
            created_at: post.created_at,
        }
    }
}

impl StoredDocument for FeedEntry {
    fn id(&self) -> &str {
        &self.id
    }

    fn sequence(&self) -> i64 {
        self.sequence
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl IntoIndexes for FeedEntry {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "sequence": -1 },
                Some(IndexOptions::builder().name("sequence_desc".to_string()).build()),
            ),
            // Pagination reads newest-first
            (
                doc! { "created_at": -1, "_id": 1 },
                Some(IndexOptions::builder().name("created_at_desc_id".to_string()).build()),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_uri() {
        let entry = FeedEntry {
            id: "did:plc:alice/3kabc".to_string(),
            sequence: 1,
            did: "did:plc:alice".to_string(),
            record_key: "3kabc".to_string(),
            created_at: Utc::now(),
        };
        assert_eq!(entry.post_uri(), "at://did:plc:alice/app.bsky.feed.post/3kabc");
    }
}
