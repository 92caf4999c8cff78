//! Service DID document
//!
//! `did:web` resolution of the service DID lands here; the document names
//! this host as the feed generator endpoint.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::json_response;
use crate::server::AppState;

/// W3C DID Document structure
#[derive(Debug, Serialize)]
pub struct DidDocument {
    #[serde(rename = "@context")]
    pub context: Vec<String>,

    pub id: String,

    pub service: Vec<Service>,
}

/// Service endpoint in DID Document
#[derive(Debug, Serialize)]
pub struct Service {
    pub id: String,

    #[serde(rename = "type")]
    pub service_type: String,

    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

pub fn build_did_document(state: &AppState) -> DidDocument {
    DidDocument {
        context: vec!["https://www.w3.org/ns/did/v1".to_string()],
        id: state.service_did.clone(),
        service: vec![Service {
            id: "#bsky_fg".to_string(),
            service_type: "BskyFeedGenerator".to_string(),
            service_endpoint: state.service_endpoint.clone(),
        }],
    }
}

/// GET /.well-known/did.json
pub fn did_document(state: &AppState) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &build_did_document(state))
}
