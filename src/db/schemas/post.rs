//! Raw post document schema
//!
//! Every `app.bsky.feed.post` record pulled off the firehose lands here,
//! keyed by `did/recordKey` so redelivery overwrites instead of duplicating.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::{IntoIndexes, StoredDocument};
use crate::firehose::{FacetFeature, PostEvent};

/// Collection name for raw posts
pub const POST_COLLECTION: &str = "post";

/// Sub-entities pulled out of the post's rich-text facets
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Facets {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
}

/// Reply references of a post
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Reply {
    #[serde(default)]
    pub root_uri: String,
    #[serde(default)]
    pub parent_uri: String,
}

impl Reply {
    /// A reply directly under the thread root (or not a reply at all)
    pub fn is_top_level(&self) -> bool {
        self.root_uri == self.parent_uri
    }
}

/// Raw post document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RawPost {
    /// `did + "/" + recordKey`
    #[serde(rename = "_id")]
    pub id: String,

    /// Firehose sequence number of the commit carrying this record
    pub sequence: i64,

    /// Author DID
    pub did: String,

    pub record_key: String,

    /// Author-asserted creation time
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub langs: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub facets: Facets,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<Reply>,
}

impl RawPost {
    /// Build the document id for a record
    pub fn make_id(did: &str, record_key: &str) -> String {
        format!("{}/{}", did, record_key)
    }

    /// Translate a decoded firehose record into a stored post.
    ///
    /// Returns `None` when `createdAt` is not RFC 3339; such posts are treated
    /// as infinitely old by the ingest filter.
    pub fn from_event(event: &PostEvent) -> Option<Self> {
        let created_at = DateTime::parse_from_rfc3339(&event.post.created_at)
            .ok()?
            .with_timezone(&Utc);

        let mut facets = Facets::default();
        for facet in &event.post.facets {
            for feature in &facet.features {
                match feature {
                    FacetFeature::Mention { did } => facets.mentions.push(did.clone()),
                    FacetFeature::Link { uri } => facets.links.push(uri.clone()),
                    FacetFeature::Tag { tag } => facets.tags.push(tag.clone()),
                    FacetFeature::Unknown => {}
                }
            }
        }

        let reply = event.post.reply.as_ref().map(|r| Reply {
            root_uri: r.root.as_ref().map(|s| s.uri.clone()).unwrap_or_default(),
            parent_uri: r.parent.as_ref().map(|s| s.uri.clone()).unwrap_or_default(),
        });

        Some(Self {
            id: Self::make_id(&event.did, &event.record_key),
            sequence: event.sequence,
            did: event.did.clone(),
            record_key: event.record_key.clone(),
            created_at,
            langs: event.post.langs.clone(),
            tags: event.post.tags.clone(),
            text: event.post.text.clone(),
            facets,
            reply,
        })
    }
}

impl StoredDocument for RawPost {
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

impl IntoIndexes for RawPost {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "sequence": -1 },
                Some(IndexOptions::builder().name("sequence_desc".to_string()).build()),
            ),
            // Eviction walks oldest-first
            (
                doc! { "created_at": 1, "_id": 1 },
                Some(IndexOptions::builder().name("created_at_asc_id".to_string()).build()),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firehose::{Facet, PostRecord, ReplyRef, StrongRef};

    fn event(post: PostRecord) -> PostEvent {
        PostEvent {
            sequence: 42,
            did: "did:plc:alice".to_string(),
            record_key: "3kabc".to_string(),
            post,
        }
    }

    #[test]
    fn test_from_event_flattens_facets_and_reply() {
        let post = PostRecord {
            text: "hello #baku".to_string(),
            created_at: "2025-03-01T12:00:00.000Z".to_string(),
            langs: vec!["az".to_string()],
            tags: vec![],
            facets: vec![Facet {
                features: vec![
                    FacetFeature::Tag { tag: "baku".to_string() },
                    FacetFeature::Link { uri: "https://example.com".to_string() },
                    FacetFeature::Mention { did: "did:plc:bob".to_string() },
                    FacetFeature::Unknown,
                ],
            }],
            reply: Some(ReplyRef {
                root: Some(StrongRef { uri: "at://root".to_string() }),
                parent: Some(StrongRef { uri: "at://parent".to_string() }),
            }),
        };

        let raw = RawPost::from_event(&event(post)).expect("valid timestamp");
        assert_eq!(raw.id, "did:plc:alice/3kabc");
        assert_eq!(raw.sequence, 42);
        assert_eq!(raw.facets.tags, vec!["baku"]);
        assert_eq!(raw.facets.links, vec!["https://example.com"]);
        assert_eq!(raw.facets.mentions, vec!["did:plc:bob"]);
        let reply = raw.reply.expect("reply kept");
        assert!(!reply.is_top_level());
    }

    #[test]
    fn test_from_event_rejects_bad_timestamp() {
        let post = PostRecord {
            created_at: "yesterday".to_string(),
            ..PostRecord::default()
        };
        assert!(RawPost::from_event(&event(post)).is_none());
    }

    #[test]
    fn test_bson_field_names() {
        let raw = RawPost {
            id: "did:plc:a/1".to_string(),
            sequence: 7,
            did: "did:plc:a".to_string(),
            record_key: "1".to_string(),
            created_at: Utc::now(),
            langs: vec![],
            tags: vec![],
            text: String::new(),
            facets: Facets::default(),
            reply: None,
        };
        let doc = bson::to_document(&raw).unwrap();
        assert_eq!(doc.get_str("_id").unwrap(), "did:plc:a/1");
        assert!(doc.get_datetime("created_at").is_ok());
        assert!(doc.contains_key("record_key"));
        assert!(!doc.contains_key("reply"));
    }
}
