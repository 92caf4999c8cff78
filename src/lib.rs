//! Feedgen - topical feed generator for the AT Protocol
//!
//! Three processes share this library:
//!
//! - **Consumer**: reads the relay firehose, decodes post records and
//!   buffers them into the raw post collection
//! - **Generator**: classifies stored posts against a feed ruleset and
//!   fills that feed's collection
//! - **API**: serves `describeFeedGenerator`, `getFeedSkeleton` and the
//!   service DID document
//!
//! Each collection is kept under a document ceiling by a periodic cutoff.

pub mod auth;
pub mod config;
pub mod db;
pub mod feed;
pub mod firehose;
pub mod generator;
pub mod ingest;
pub mod logging;
pub mod routes;
pub mod server;
pub mod services;
pub mod tasks;
pub mod types;

pub use server::{run, AppState};
pub use types::{FeedgenError, Result};
