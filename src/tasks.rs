//! Supervised periodic jobs
//!
//! Each run is timed and its outcome logged. A failing run does not stop
//! the schedule; only cancellation does. A run in progress is never dropped
//! midway; cancellation takes effect once it returns.

use std::fmt::Debug;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::types::Result;

/// Run `job` now and then every `delay` after the previous run finished,
/// until `cancel` fires.
pub fn spawn_periodic<F, Fut, T>(
    name: &'static str,
    delay: Duration,
    cancel: CancellationToken,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Debug + Send + 'static,
{
    info!(task = name, delay_secs = delay.as_secs(), "Periodic task started");

    tokio::spawn(async move {
        while !cancel.is_cancelled() {
            let started = Instant::now();
            let outcome = job().await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(value) => info!(task = name, elapsed_ms, result = ?value, "Periodic task run finished"),
                Err(e) => error!(task = name, elapsed_ms, error = %e, "Periodic task run failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!(task = name, "Periodic task stopped");
    })
}

/// Cancel `cancel` on Ctrl-C or SIGTERM
pub fn cancel_on_shutdown_signal(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = ctrl_c() => info!("Received Ctrl-C, shutting down"),
            _ = terminate() => info!("Received SIGTERM, shutting down"),
            _ = cancel.cancelled() => return,
        }
        cancel.cancel();
    })
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeedgenError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_runs_until_cancelled() {
        let runs = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let counter = Arc::clone(&runs);
        let handle = spawn_periodic("count", Duration::from_secs(60), cancel.clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 2 {
                    return Err(FeedgenError::Internal("second run fails".into()));
                }
                Ok(n)
            }
        });

        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
        handle.await.unwrap();

        // t=0, t=60 (failed), t=120
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
