//! Database schemas
//!
//! Defines the MongoDB document structures for raw posts and feed entries.

mod feed_entry;
mod post;

pub use feed_entry::FeedEntry;
pub use post::{Facets, RawPost, Reply, POST_COLLECTION};
