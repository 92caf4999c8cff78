//! `app.bsky.feed.post` record and content hash verification

use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use serde::{Deserialize, Serialize};

/// Collection NSID of post records
pub const POST_NSID: &str = "app.bsky.feed.post";

/// Fields of a post record the feed cares about; everything else is ignored
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,

    /// Author-asserted RFC 3339 timestamp
    #[serde(default)]
    pub created_at: String,

    #[serde(default)]
    pub langs: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub facets: Vec<Facet>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
}

/// Rich-text annotation over a byte range of the text
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Facet {
    #[serde(default)]
    pub features: Vec<FacetFeature>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "$type")]
pub enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#mention")]
    Mention { did: String },

    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },

    #[serde(rename = "app.bsky.richtext.facet#tag")]
    Tag { tag: String },

    #[serde(other)]
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ReplyRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<StrongRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<StrongRef>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct StrongRef {
    pub uri: String,
}

/// Decode DAG-CBOR record bytes into a post
pub fn decode_post(bytes: &[u8]) -> Result<PostRecord, String> {
    serde_ipld_dagcbor::from_slice(bytes).map_err(|e| e.to_string())
}

/// Check that `bytes` hash to `expected` under the same codec and hash function
pub fn verify_cid(expected: &Cid, bytes: &[u8]) -> bool {
    let Ok(code) = Code::try_from(expected.hash().code()) else {
        return false;
    };
    let actual = Cid::new_v1(expected.codec(), code.digest(bytes));
    actual == *expected
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAG_CBOR: u64 = 0x71;

    fn sample() -> PostRecord {
        PostRecord {
            text: "Salam #baku".to_string(),
            created_at: "2025-03-01T12:00:00Z".to_string(),
            langs: vec!["az".to_string()],
            tags: vec![],
            facets: vec![Facet {
                features: vec![FacetFeature::Tag { tag: "baku".to_string() }],
            }],
            reply: None,
        }
    }

    #[test]
    fn test_verify_cid_accepts_matching_bytes() {
        let bytes = serde_ipld_dagcbor::to_vec(&sample()).unwrap();
        let cid = Cid::new_v1(DAG_CBOR, Code::Sha2_256.digest(&bytes));
        assert!(verify_cid(&cid, &bytes));
    }

    #[test]
    fn test_verify_cid_rejects_tampered_bytes() {
        let bytes = serde_ipld_dagcbor::to_vec(&sample()).unwrap();
        let cid = Cid::new_v1(DAG_CBOR, Code::Sha2_256.digest(&bytes));

        let mut tampered = sample();
        tampered.text = "something else".to_string();
        let other = serde_ipld_dagcbor::to_vec(&tampered).unwrap();
        assert!(!verify_cid(&cid, &other));
    }

    #[test]
    fn test_decode_post_keeps_known_facets() {
        let bytes = serde_ipld_dagcbor::to_vec(&sample()).unwrap();
        let post = decode_post(&bytes).unwrap();
        assert_eq!(post, sample());
    }

    #[test]
    fn test_decode_post_rejects_garbage() {
        assert!(decode_post(&[0xff, 0x00, 0x13]).is_err());
    }
}
