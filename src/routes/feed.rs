//! Feed generator XRPC endpoints
//!
//! - `app.bsky.feed.describeFeedGenerator`
//! - `app.bsky.feed.getFeedSkeleton`

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{error_response, json_response};
use crate::feed::{FeedDescription, PageLimit, SkeletonPage};
use crate::server::AppState;
use crate::types::{FeedgenError, ReadCursor, Result};

/// `describeFeedGenerator` response body
#[derive(Debug, Serialize)]
pub struct DescribeFeedGenerator {
    pub did: String,
    pub feeds: Vec<FeedDescription>,
}

/// Raw `getFeedSkeleton` query; every value is validated after parsing
#[derive(Debug, Default, Deserialize)]
pub struct SkeletonQuery {
    pub feed: Option<String>,
    pub limit: Option<String>,
    pub cursor: Option<String>,
}

impl SkeletonQuery {
    pub fn parse(query: Option<&str>) -> Result<Self> {
        serde_urlencoded::from_str(query.unwrap_or_default())
            .map_err(|e| FeedgenError::BadRequest(format!("invalid query string: {}", e)))
    }
}

pub fn describe_feed_generator(state: &AppState) -> Response<Full<Bytes>> {
    let body = DescribeFeedGenerator {
        did: state.publisher_did.clone(),
        feeds: state.registry.describe(),
    };
    json_response(StatusCode::OK, &body)
}

pub async fn get_feed_skeleton(
    state: &AppState,
    query: Option<&str>,
    authorization: Option<&str>,
) -> Response<Full<Bytes>> {
    match feed_skeleton(state, query, authorization).await {
        Ok(page) => json_response(StatusCode::OK, &page),
        Err(e) => error_response(e),
    }
}

async fn feed_skeleton(
    state: &AppState,
    query: Option<&str>,
    authorization: Option<&str>,
) -> Result<SkeletonPage> {
    let requester = state.auth.requester(authorization).await?;
    let query = SkeletonQuery::parse(query)?;

    let feed = state.registry.resolve(query.feed.as_deref())?;
    let limit = PageLimit::parse(query.limit.as_deref());
    let cursor = ReadCursor::parse(query.cursor.as_deref())?;

    debug!(
        feed = feed.name(),
        requester = requester.as_deref().unwrap_or("anonymous"),
        limit = limit.get(),
        cursor = cursor.offset(),
        "Serving feed skeleton"
    );

    tokio::time::timeout(
        state.page_timeout,
        feed.get_page(requester.as_deref(), limit, cursor),
    )
    .await
    .map_err(|_| FeedgenError::Timeout(format!("reading feed {}", feed.name())))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_parsing() {
        let query = SkeletonQuery::parse(Some(
            "feed=at%3A%2F%2Fdid%3Aplc%3Aabc%2Fapp.bsky.feed.generator%2FAzPulse&limit=10",
        ))
        .unwrap();
        assert_eq!(
            query.feed.as_deref(),
            Some("at://did:plc:abc/app.bsky.feed.generator/AzPulse")
        );
        assert_eq!(query.limit.as_deref(), Some("10"));
        assert!(query.cursor.is_none());

        let empty = SkeletonQuery::parse(None).unwrap();
        assert!(empty.feed.is_none());
    }
}
