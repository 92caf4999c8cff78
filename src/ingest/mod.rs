//! Firehose to raw-post store

mod buffer;

pub use buffer::{accept_post, resolve_cursor, run, BufferConfig};
