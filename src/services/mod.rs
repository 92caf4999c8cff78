//! External services
//!
//! - **DidResolver**: DID resolution for request authentication

pub mod did_resolver;

pub use did_resolver::{DidDocument, DidResolver, DidResolverConfig, DidResolverError};
