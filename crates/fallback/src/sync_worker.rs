//! Background worker that reconnects and drains the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::monitor::Backoff;
use crate::sync_manager::FallbackManager;
use crate::types::SyncState;

/// Periodically checks the backend and drains pending operations.
///
/// While the backend is unreachable the wait between attempts grows from the
/// backoff's initial delay up to its cap; a successful drain resets it to the
/// regular interval.
pub struct SyncWorker {
    manager: Arc<FallbackManager>,
    interval: Duration,
    backoff: Backoff,
    shutdown: Arc<Notify>,
}

impl SyncWorker {
    pub fn new(manager: Arc<FallbackManager>, interval: Duration, backoff: Backoff) -> Self {
        Self {
            manager,
            interval,
            backoff,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle that stops the worker once notified.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Spawn the worker loop.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        tracing::info!(interval = ?self.interval, "background sync worker started");

        let shutdown = self.shutdown.clone();
        let mut delay = Duration::ZERO;
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    tracing::info!("background sync worker received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(delay) => {
                    delay = self.tick().await;
                }
            }
        }

        tracing::info!("background sync worker stopped");
    }

    /// One reconnect/drain attempt; returns how long to wait before the next.
    async fn tick(&mut self) -> Duration {
        match self.manager.sync_pending_operations().await {
            Ok(report) if report.state == SyncState::Online => {
                if !report.replayed.is_empty() || !report.dead_lettered.is_empty() {
                    tracing::info!(
                        replayed = report.replayed.len(),
                        dead_lettered = report.dead_lettered.len(),
                        "background sync drained queue"
                    );
                }
                self.backoff.reset();
                self.interval
            }
            Ok(report) => {
                let wait = self.backoff.next_delay();
                match &report.failure {
                    Some(failure) if !failure.transient => {
                        // Rejections wait for an operator: regular interval.
                        tracing::warn!(
                            operation_id = %failure.operation_id,
                            error = %failure.error,
                            remaining = report.remaining,
                            "background sync halted on rejected operation"
                        );
                        self.backoff.reset();
                        self.interval
                    }
                    _ => {
                        tracing::debug!(
                            remaining = report.remaining,
                            retry_in = ?wait,
                            "backend unreachable; backing off"
                        );
                        wait
                    }
                }
            }
            Err(e) => {
                let wait = self.backoff.next_delay();
                tracing::error!(error = %e, retry_in = ?wait, "background sync failed");
                wait
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::store::InMemoryStore;
    use protrack_core::{Collection, NewProduct};

    #[tokio::test]
    async fn worker_drains_once_backend_returns_and_stops_on_shutdown() {
        let backend = Arc::new(InMemoryBackend::unreachable());
        let manager = Arc::new(FallbackManager::new(backend.clone(), InMemoryStore::arc()));
        manager
            .create_product(NewProduct {
                name: "Coffee".to_string(),
                batch_number: "B-1".to_string(),
                manufacturer: "Acme".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let worker = SyncWorker::new(
            manager.clone(),
            Duration::from_millis(20),
            Backoff::new(Duration::from_millis(5), Duration::from_millis(20)),
        );
        let shutdown = worker.shutdown_handle();
        let handle = worker.start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.get_pending_operations_count().await.unwrap(), 1);

        backend.set_reachable(true);
        let mut drained = false;
        for _ in 0..100 {
            if manager.get_pending_operations_count().await.unwrap() == 0 {
                drained = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(drained, "worker never drained the queue");
        assert_eq!(backend.len(Collection::Products), 1);

        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn backoff_grows_while_unreachable() {
        let backend = Arc::new(InMemoryBackend::unreachable());
        let manager = Arc::new(FallbackManager::new(backend, InMemoryStore::arc()));
        let mut worker = SyncWorker::new(
            manager,
            Duration::from_secs(60),
            Backoff::new(Duration::from_secs(1), Duration::from_secs(4)),
        );

        assert_eq!(worker.tick().await, Duration::from_secs(1));
        assert_eq!(worker.tick().await, Duration::from_secs(2));
        assert_eq!(worker.tick().await, Duration::from_secs(4));
        assert_eq!(worker.tick().await, Duration::from_secs(4));
    }
}
