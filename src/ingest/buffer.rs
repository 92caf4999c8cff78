//! Batch persistence buffer
//!
//! Owns the firehose subscription. A supervisor task keeps a connection open
//! and reconnects from the store's highest sequence whenever it drops. The
//! buffer loop collects decoded posts and writes them out on a fixed tick;
//! a tick that finds nothing to write after the idle timeout tells the
//! supervisor to drop the connection and dial again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::schemas::RawPost;
use crate::db::Collection;
use crate::firehose::{FirehoseSource, PostEvent};
use crate::types::{ConsumerCursor, FeedgenError, Result};

/// Timing and sizing of the buffer
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Posts created longer ago than this are dropped
    pub max_age: Duration,
    pub flush_interval: Duration,
    /// Reconnect when nothing was written for this long
    pub idle_timeout: Duration,
    /// Pause between a dropped connection and the next dial
    pub reconnect_delay: Duration,
    /// Capacity of the channel between the subscription and the buffer
    pub channel_capacity: usize,
}

impl BufferConfig {
    pub fn new(max_age: Duration, flush_interval: Duration) -> Self {
        Self {
            max_age,
            flush_interval,
            idle_timeout: Duration::from_secs(25),
            reconnect_delay: Duration::from_secs(5),
            channel_capacity: 500,
        }
    }
}

/// Turn a cursor option into the sequence to resume from
pub async fn resolve_cursor(
    store: &dyn Collection<RawPost>,
    option: ConsumerCursor,
) -> Result<Option<i64>> {
    match option {
        ConsumerCursor::LastConsumed => store.max_sequence().await,
        ConsumerCursor::FirstStream => Ok(Some(0)),
        ConsumerCursor::CurrentStream => Ok(None),
    }
}

/// Convert an event, dropping posts older than `max_age` at `now`.
///
/// A post whose timestamp does not parse counts as too old.
pub fn accept_post(event: &PostEvent, max_age: Duration, now: DateTime<Utc>) -> Option<RawPost> {
    let post = RawPost::from_event(event)?;
    let cutoff = chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age));
    match cutoff {
        Some(cutoff) if post.created_at <= cutoff => None,
        _ => Some(post),
    }
}

/// Keep a firehose connection open until `cancel` fires.
///
/// Returns an error only when the resume cursor cannot be read back.
async fn supervise(
    cancel: CancellationToken,
    store: Arc<dyn Collection<RawPost>>,
    source: Arc<dyn FirehoseSource>,
    mut cursor: Option<i64>,
    sink: mpsc::Sender<PostEvent>,
    stall: Arc<Notify>,
    reconnect_delay: Duration,
) -> Result<()> {
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = stall.notified() => Err(FeedgenError::Stream("no data received, dropping connection".into())),
            result = source.consume(cursor, sink.clone()) => result,
        };
        match outcome {
            Ok(()) => info!("Firehose consumer returned"),
            Err(e) => warn!(error = %e, "Firehose consumer stopped"),
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(reconnect_delay) => {}
        }

        if let Some(seq) = store.max_sequence().await? {
            cursor = Some(seq);
        }
        info!(cursor = ?cursor, "Reconnecting to firehose");
    }
}

/// Consume the firehose into `store` until `cancel` fires.
///
/// A failed write ends the run with that error; restarting reprocesses the
/// same window, which the id-keyed upsert makes harmless.
pub async fn run(
    cancel: CancellationToken,
    store: Arc<dyn Collection<RawPost>>,
    source: Arc<dyn FirehoseSource>,
    cursor: ConsumerCursor,
    config: BufferConfig,
) -> Result<()> {
    let resume = resolve_cursor(store.as_ref(), cursor).await?;
    info!(cursor = %cursor, resume = ?resume, "Starting firehose consumer");

    // Stops the supervisor however this function returns
    let local = cancel.child_token();
    let _stop_ingest = local.clone().drop_guard();

    let (sink, mut events) = mpsc::channel::<PostEvent>(config.channel_capacity.max(1));
    let stall = Arc::new(Notify::new());
    let mut ingest = tokio::spawn(supervise(
        local,
        Arc::clone(&store),
        source,
        resume,
        sink,
        Arc::clone(&stall),
        config.reconnect_delay,
    ));

    let mut ticker = interval_at(Instant::now() + config.flush_interval, config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut batch: Vec<RawPost> = Vec::new();
    let mut last_flush = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Consumer shutting down");
                flush(store.as_ref(), &mut batch).await?;
                return Ok(());
            }

            joined = &mut ingest => {
                flush(store.as_ref(), &mut batch).await?;
                return match joined {
                    Ok(result) => result,
                    Err(e) => Err(FeedgenError::Internal(format!("ingest task failed: {}", e))),
                };
            }

            Some(event) = events.recv() => {
                if let Some(post) = accept_post(&event, config.max_age, Utc::now()) {
                    batch.push(post);
                }
            }

            _ = ticker.tick() => {
                if !batch.is_empty() {
                    last_flush = Instant::now();
                    flush(store.as_ref(), &mut batch).await?;
                } else if last_flush.elapsed() > config.idle_timeout {
                    warn!(
                        idle_secs = last_flush.elapsed().as_secs(),
                        "Inactive firehose consumer, forcing reconnect"
                    );
                    stall.notify_waiters();
                    last_flush = Instant::now();
                }
            }
        }
    }
}

async fn flush(store: &dyn Collection<RawPost>, batch: &mut Vec<RawPost>) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let posts = std::mem::take(batch);
    let count = posts.len();
    match store.insert(true, posts).await {
        Ok(()) => {
            debug!(count, "Flushed post batch");
            Ok(())
        }
        Err(e) => {
            error!(count, error = %e, "Post batch insert failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firehose::PostRecord;

    fn event(created_at: &str) -> PostEvent {
        PostEvent {
            sequence: 1,
            did: "did:plc:alice".to_string(),
            record_key: "3kabc".to_string(),
            post: PostRecord {
                created_at: created_at.to_string(),
                ..PostRecord::default()
            },
        }
    }

    #[test]
    fn test_old_posts_are_dropped() {
        let now = DateTime::parse_from_rfc3339("2025-03-10T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let week = Duration::from_secs(7 * 24 * 3600);

        assert!(accept_post(&event("2025-03-09T00:00:00Z"), week, now).is_some());
        assert!(accept_post(&event("2025-03-01T00:00:00Z"), week, now).is_none());
        assert!(accept_post(&event("not a date"), week, now).is_none());
    }

    #[test]
    fn test_default_timings() {
        let config = BufferConfig::new(Duration::from_secs(60), Duration::from_secs(10));
        assert_eq!(config.idle_timeout, Duration::from_secs(25));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.channel_capacity, 500);
    }
}
