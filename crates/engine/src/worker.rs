//! Interval-driven background workers.
//!
//! Each worker owns its lifecycle: a tokio interval loop with a watch
//! channel for shutdown. Ticks run the job to completion sequentially, so
//! a slow iteration delays the next tick instead of piling up overlapping
//! runs.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a running worker. Stopping is idempotent; dropping the
/// handle without stopping leaves the worker running detached.
pub struct WorkerHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal shutdown and wait for the in-flight iteration to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            tracing::error!(worker = self.name, error = %e, "worker task panicked");
        }
        tracing::debug!(worker = self.name, "worker stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Spawn a worker that runs `tick` every `interval`. The first tick fires
/// after one full interval, not immediately.
pub fn spawn_interval_worker<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut tick: F,
) -> WorkerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let join = tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Consume the immediate first tick.
        timer.tick().await;
        tracing::info!(worker = name, ?interval, "worker started");
        loop {
            tokio::select! {
                _ = timer.tick() => tick().await,
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(worker = name, "worker loop exited");
    });
    WorkerHandle {
        name,
        shutdown,
        join,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn worker_ticks_on_the_interval_and_stops() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handle = spawn_interval_worker("test", Duration::from_secs(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        handle.stop().await;
        let after_stop = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }
}
