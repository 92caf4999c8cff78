//! Firehose subscription
//!
//! Dials `com.atproto.sync.subscribeRepos` on a relay, decodes commit frames
//! and hands every post record to a sink channel. Commits are dispatched
//! through an [`OrderedScheduler`] keyed by repository DID, so records of the
//! same author reach the sink in sequence order.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{http::Request, protocol::Message},
};
use tracing::{debug, error, info, warn};

use super::car;
use super::frame::{self, CommitEvent, Frame};
use super::record::{self, PostRecord, POST_NSID};
use super::scheduler::{OrderedScheduler, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use crate::types::{FeedgenError, Result};

/// One post record pulled off the firehose
#[derive(Debug, Clone)]
pub struct PostEvent {
    pub sequence: i64,
    pub did: String,
    pub record_key: String,
    pub post: PostRecord,
}

/// A source of post events that can resume from a sequence number
#[async_trait]
pub trait FirehoseSource: Send + Sync {
    /// Stream events into `sink` until the connection ends.
    ///
    /// `cursor` is the sequence to resume from; `None` tails live events
    /// only. Always returns an error when the stream stops, since the
    /// firehose never ends on its own.
    async fn consume(&self, cursor: Option<i64>, sink: mpsc::Sender<PostEvent>) -> Result<()>;
}

/// Websocket firehose client
#[derive(Debug, Clone)]
pub struct Firehose {
    relay_host: String,
    workers: usize,
    queue_capacity: usize,
}

impl Firehose {
    pub fn new(relay_host: impl Into<String>) -> Self {
        Self {
            relay_host: relay_host.into(),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Subscription URL for an optional resume cursor
    pub fn subscribe_url(&self, cursor: Option<i64>) -> String {
        let base = self.relay_host.trim_end_matches('/');
        match cursor {
            Some(seq) => format!("{}/xrpc/com.atproto.sync.subscribeRepos?cursor={}", base, seq),
            None => format!("{}/xrpc/com.atproto.sync.subscribeRepos", base),
        }
    }
}

#[async_trait]
impl FirehoseSource for Firehose {
    async fn consume(&self, cursor: Option<i64>, sink: mpsc::Sender<PostEvent>) -> Result<()> {
        let url = self.subscribe_url(cursor);
        let host = url
            .split("//")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .unwrap_or_default()
            .to_string();

        let request = Request::builder()
            .uri(&url)
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("User-Agent", "feedgen-consumer")
            .body(())
            .map_err(|e| FeedgenError::Stream(format!("Failed to build request: {}", e)))?;

        info!(upstream = %self.relay_host, cursor = ?cursor, "Subscribing to repo event stream");
        let (mut ws, _) = connect_async_with_config(request, None, false)
            .await
            .map_err(|e| FeedgenError::Stream(format!("subscribing to firehose failed: {}", e)))?;

        let scheduler = OrderedScheduler::new(
            self.workers,
            self.queue_capacity,
            move |commit: CommitEvent| {
                let sink = sink.clone();
                async move {
                    for event in extract_posts(&commit) {
                        if sink.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            },
        );
        info!(workers = self.workers, "Firehose scheduler configured");

        let outcome = loop {
            let Some(message) = ws.next().await else {
                break Err(FeedgenError::Stream("firehose stream ended".into()));
            };
            let data = match message {
                Ok(Message::Binary(data)) => data,
                Ok(Message::Close(frame)) => {
                    break Err(FeedgenError::Stream(format!(
                        "firehose closed by relay: {:?}",
                        frame
                    )));
                }
                Ok(_) => continue,
                Err(e) => break Err(e.into()),
            };

            match frame::decode(&data) {
                Ok(Frame::Commit(commit)) => {
                    if let Err(e) = scheduler.submit(commit.repo.clone(), commit).await {
                        break Err(e);
                    }
                }
                Ok(Frame::Error { error, message }) => {
                    break Err(FeedgenError::Stream(format!(
                        "relay error frame: {} {}",
                        error,
                        message.unwrap_or_default()
                    )));
                }
                Ok(Frame::Other(kind)) => debug!(kind = %kind, "Ignoring frame"),
                Err(e) => warn!(error = %e, "Failed to decode frame"),
            }
        };

        debug!(active = scheduler.active_keys(), "Draining firehose scheduler");
        scheduler.shutdown().await;
        outcome
    }
}

/// `did:<method>:<id>` with a lowercase method and a non-empty id
fn is_valid_did(did: &str) -> bool {
    let mut parts = did.splitn(3, ':');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some("did"), Some(method), Some(id))
            if !method.is_empty()
                && method.chars().all(|c| c.is_ascii_lowercase())
                && !id.is_empty()
                && !id.ends_with(':')
    )
}

/// Split `<collection>/<recordKey>`
fn parse_repo_path(path: &str) -> Option<(&str, &str)> {
    let (collection, rkey) = path.split_once('/')?;
    let nsid_ok = collection.contains('.')
        && collection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    let rkey_ok = !rkey.is_empty()
        && rkey != "."
        && rkey != ".."
        && rkey
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._:~-".contains(c));
    (nsid_ok && rkey_ok).then_some((collection, rkey))
}

/// Pull the post records out of one commit.
///
/// Problems with single records are logged and the record skipped; a
/// malformed commit yields nothing.
pub fn extract_posts(commit: &CommitEvent) -> Vec<PostEvent> {
    let mut posts = Vec::new();

    if commit.too_big {
        warn!(did = %commit.repo, seq = commit.seq, "Skipping tooBig commit");
        return posts;
    }
    if !is_valid_did(&commit.repo) {
        error!(did = %commit.repo, seq = commit.seq, "Bad DID syntax in event");
        return posts;
    }

    let blocks = match car::read_blocks(&commit.blocks) {
        Ok(blocks) => blocks,
        Err(e) => {
            error!(did = %commit.repo, seq = commit.seq, error = %e, "Failed to read blocks from CAR");
            return posts;
        }
    };

    for op in &commit.ops {
        let Some((collection, rkey)) = parse_repo_path(&op.path) else {
            // A bad path abandons the rest of the commit
            error!(did = %commit.repo, seq = commit.seq, path = %op.path, "Invalid path in repo op");
            return posts;
        };
        if !matches!(op.action.as_str(), "create" | "update") || collection != POST_NSID {
            continue;
        }

        let Some(cid) = op.cid.as_ref() else {
            error!(did = %commit.repo, seq = commit.seq, path = %op.path, "Repo op without CID");
            continue;
        };
        let Some(bytes) = blocks.get(cid) else {
            error!(did = %commit.repo, seq = commit.seq, path = %op.path, "Record block missing from CAR");
            continue;
        };
        if !record::verify_cid(cid, bytes) {
            error!(did = %commit.repo, seq = commit.seq, path = %op.path, cid = %cid, "Mismatch between op CID and record block");
            continue;
        }

        match record::decode_post(bytes) {
            Ok(post) => posts.push(PostEvent {
                sequence: commit.seq,
                did: commit.repo.clone(),
                record_key: rkey.to_string(),
                post,
            }),
            Err(e) => {
                error!(did = %commit.repo, seq = commit.seq, path = %op.path, error = %e, "Failed to parse post record");
            }
        }
    }

    posts
}
