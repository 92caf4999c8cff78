//! Ordered-parallel dispatcher
//!
//! A fixed pool of workers pulls items off one bounded queue. Items sharing
//! a key are handled one at a time in submission order: while a key is being
//! worked on, later items for it wait in a per-key backlog that the same
//! worker drains before taking new work. Items of different keys run in
//! parallel with no relative ordering.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::types::{FeedgenError, Result};

/// Worker count used for the firehose
pub const DEFAULT_WORKERS: usize = 8;

/// Queue size used for the firehose; absorbs socket-read bursts
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;

/// Keys currently owned by a worker, with their waiting items
type Backlog<T> = Arc<Mutex<HashMap<String, VecDeque<T>>>>;

/// Lock the backlog, recovering it if a holder panicked. The map is only
/// touched by short push/pop sections, so its contents stay consistent.
fn lock_backlog<T>(backlog: &Backlog<T>) -> MutexGuard<'_, HashMap<String, VecDeque<T>>> {
    backlog.lock().unwrap_or_else(|poisoned| {
        warn!("Scheduler backlog lock was poisoned, recovering");
        backlog.clear_poison();
        poisoned.into_inner()
    })
}

/// Per-key FIFO dispatcher over a fixed worker pool
pub struct OrderedScheduler<T> {
    queue_tx: mpsc::Sender<(String, T)>,
    backlog: Backlog<T>,
    workers: JoinSet<()>,
}

impl<T> OrderedScheduler<T>
where
    T: Send + 'static,
{
    /// Start `worker_count` workers calling `handler` for every item
    pub fn new<H, Fut>(worker_count: usize, queue_capacity: usize, handler: H) -> Self
    where
        H: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (queue_tx, queue_rx) = mpsc::channel::<(String, T)>(queue_capacity.max(1));
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let backlog: Backlog<T> = Arc::new(Mutex::new(HashMap::new()));
        let handler = Arc::new(handler);

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count.max(1) {
            let queue_rx = Arc::clone(&queue_rx);
            let backlog = Arc::clone(&backlog);
            let handler = Arc::clone(&handler);
            workers.spawn(async move {
                worker_task(worker_id, queue_rx, backlog, handler).await;
            });
        }

        Self {
            queue_tx,
            backlog,
            workers,
        }
    }

    /// Queue an item. Waits while the queue is full.
    pub async fn submit(&self, key: String, item: T) -> Result<()> {
        {
            let mut backlog = lock_backlog(&self.backlog);
            if let Some(waiting) = backlog.get_mut(&key) {
                waiting.push_back(item);
                return Ok(());
            }
            backlog.insert(key.clone(), VecDeque::new());
        }

        self.queue_tx
            .send((key, item))
            .await
            .map_err(|_| FeedgenError::Internal("scheduler workers stopped".into()))
    }

    /// Number of keys currently being worked on
    pub fn active_keys(&self) -> usize {
        lock_backlog(&self.backlog).len()
    }

    /// Stop accepting work and wait for everything queued to be handled
    pub async fn shutdown(self) {
        let Self {
            queue_tx,
            mut workers,
            ..
        } = self;
        drop(queue_tx);
        while workers.join_next().await.is_some() {}
    }
}

/// Take the next waiting item for `key`, releasing the key when none is left
fn next_for_key<T>(backlog: &Backlog<T>, key: &str) -> Option<T> {
    let mut backlog = lock_backlog(backlog);
    match backlog.get_mut(key).and_then(VecDeque::pop_front) {
        Some(item) => Some(item),
        None => {
            backlog.remove(key);
            None
        }
    }
}

async fn worker_task<T, H, Fut>(
    worker_id: usize,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<(String, T)>>>,
    backlog: Backlog<T>,
    handler: Arc<H>,
) where
    H: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let next = {
            let mut rx = queue_rx.lock().await;
            rx.recv().await
        };
        let Some((key, item)) = next else {
            debug!("Scheduler worker {} shutting down (queue closed)", worker_id);
            return;
        };

        handler(item).await;
        while let Some(item) = next_for_key(&backlog, &key) {
            handler(item).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_keeps_submission_order() {
        let seen: Arc<Mutex<Vec<(String, u32)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let scheduler = OrderedScheduler::new(4, 16, move |(key, n): (String, u32)| {
            let sink = Arc::clone(&sink);
            async move {
                // Uneven work so parallel workers would reorder without the backlog
                tokio::time::sleep(Duration::from_millis(u64::from(n % 3))).await;
                sink.lock().unwrap().push((key, n));
            }
        });

        for n in 0..60u32 {
            let key = format!("did:plc:{}", n % 3);
            scheduler.submit(key.clone(), (key, n)).await.unwrap();
        }
        scheduler.shutdown().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 60);
        for key in ["did:plc:0", "did:plc:1", "did:plc:2"] {
            let order: Vec<u32> = seen.iter().filter(|(k, _)| k == key).map(|(_, n)| *n).collect();
            let mut sorted = order.clone();
            sorted.sort();
            assert_eq!(order, sorted, "items for {key} were reordered");
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_backlog() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let scheduler = OrderedScheduler::new(2, 4, move |_: u32| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });
        for n in 0..10 {
            scheduler.submit("same".to_string(), n).await.unwrap();
        }
        scheduler.shutdown().await;
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 10);
    }

    #[test]
    fn test_poisoned_backlog_keeps_draining() {
        let backlog: Backlog<u32> = Arc::new(Mutex::new(HashMap::new()));
        backlog
            .lock()
            .unwrap()
            .insert("did:plc:a".to_string(), VecDeque::from([1, 2]));

        let holder = Arc::clone(&backlog);
        let _ = std::thread::spawn(move || {
            let _guard = holder.lock().unwrap();
            panic!("handler bug");
        })
        .join();
        assert!(backlog.is_poisoned());

        assert_eq!(next_for_key(&backlog, "did:plc:a"), Some(1));
        assert_eq!(next_for_key(&backlog, "did:plc:a"), Some(2));
        assert_eq!(next_for_key(&backlog, "did:plc:a"), None);
        assert!(lock_backlog(&backlog).is_empty());
        assert!(!backlog.is_poisoned());
    }
}
