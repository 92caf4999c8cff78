//! HTTP server implementation
//!
//! hyper http1 with TokioIo; one task per connection. Cancelling the root
//! token stops the accept loop and asks open connections to finish their
//! in-flight request.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::header::AUTHORIZATION;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::feed::FeedRegistry;
use crate::routes;
use crate::types::FeedgenError;

/// Upper bound on one feed page request
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long open connections get to finish after shutdown starts
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state
pub struct AppState {
    /// Feeds served by this instance
    pub registry: FeedRegistry,
    /// Bearer-token verification for skeleton requests
    pub auth: Authenticator,
    /// DID of the account that publishes the feed records
    pub publisher_did: String,
    /// `did:web` identity of this service
    pub service_did: String,
    /// Public base URL, advertised in the DID document
    pub service_endpoint: String,
    pub page_timeout: Duration,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        registry: FeedRegistry,
        auth: Authenticator,
        publisher_did: impl Into<String>,
        service_endpoint: impl Into<String>,
    ) -> Self {
        let service_did = auth.service_did().to_string();
        Self {
            registry,
            auth,
            publisher_did: publisher_did.into(),
            service_did,
            service_endpoint: service_endpoint.into(),
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            started_at: Instant::now(),
        }
    }

    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }
}

/// Serve until `cancel` fires, then drain connections
pub async fn run(
    state: Arc<AppState>,
    listener: TcpListener,
    cancel: CancellationToken,
) -> Result<(), FeedgenError> {
    let local_addr = listener.local_addr()?;
    info!(
        addr = %local_addr,
        service_did = %state.service_did,
        feeds = state.registry.len(),
        "Feed API listening"
    );

    let mut connections = JoinSet::new();

    loop {
        // Reap finished connection tasks
        while connections.try_join_next().is_some() {}

        let (stream, addr) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                    continue;
                }
            },
        };

        let state = Arc::clone(&state);
        let cancel = cancel.clone();
        connections.spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let state = Arc::clone(&state);
                async move { handle_request(state, addr, req).await }
            });

            let conn = http1::Builder::new().serve_connection(io, service);
            let mut conn = std::pin::pin!(conn);

            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = cancel.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };
            if let Err(err) = result {
                debug!("Error serving connection from {}: {:?}", addr, err);
            }
        });
    }

    info!(open = connections.len(), "Feed API shutting down");
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            open = connections.len(),
            "Connections still open after shutdown timeout, aborting"
        );
        connections.abort_all();
    }

    Ok(())
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = dispatch(&state, req).await;

    info!(
        remote = %addr,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request served"
    );
    Ok(response)
}

/// Route one request. The body is never read.
pub async fn dispatch<B>(state: &AppState, req: Request<B>) -> Response<Full<Bytes>> {
    let (parts, _body) = req.into_parts();
    let path = parts.uri.path();

    match (&parts.method, path) {
        (&Method::OPTIONS, _) => routes::preflight_response(),

        (&Method::GET, "/health") | (&Method::GET, "/healthz") => routes::health_check(state),

        (&Method::GET, "/.well-known/did.json") => routes::did_document(state),

        (&Method::GET, "/xrpc/app.bsky.feed.describeFeedGenerator") => {
            routes::describe_feed_generator(state)
        }

        (&Method::GET, "/xrpc/app.bsky.feed.getFeedSkeleton") => {
            let authorization = parts
                .headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok());
            routes::get_feed_skeleton(state, parts.uri.query(), authorization).await
        }

        (&Method::GET, _) => match routes::UsersRoute::parse(path) {
            Some(route) => routes::feed_users(state, route),
            None => routes::not_found_response(path),
        },

        _ => routes::not_found_response(path),
    }
}
