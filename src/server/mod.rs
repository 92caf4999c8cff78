//! HTTP server for the feed read API

mod http;

pub use http::{dispatch, run, AppState, DEFAULT_PAGE_TIMEOUT, SHUTDOWN_TIMEOUT};
