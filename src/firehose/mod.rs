//! Firehose ingestion pipeline
//!
//! - `frame`: websocket message decoding
//! - `car`: block map extraction from commit CAR slices
//! - `record`: post records and content hash checks
//! - `scheduler`: ordered-parallel dispatch
//! - `consumer`: the subscription itself

pub mod car;
pub mod consumer;
pub mod frame;
pub mod record;
pub mod scheduler;

pub use consumer::{extract_posts, Firehose, FirehoseSource, PostEvent};
pub use frame::{CommitEvent, Frame, RepoOp};
pub use record::{Facet, FacetFeature, PostRecord, ReplyRef, StrongRef};
pub use scheduler::OrderedScheduler;
