//! Shared types: errors and cursor options

mod cursor;
mod error;

pub use cursor::{ConsumerCursor, GeneratorCursor, ReadCursor};
pub use error::{FeedgenError, Result};
