//! Backend reachability tracking.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::backend::{Backend, BackendError};
use crate::types::ConnectionStatus;

/// Owns the `ConnectionStatus` and is the only thing that checks the backend.
#[derive(Debug)]
pub struct ConnectionMonitor {
    timeout: Duration,
    status: Mutex<ConnectionStatus>,
}

impl ConnectionMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            status: Mutex::new(ConnectionStatus::default()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.status.lock().await.clone()
    }

    /// Check the backend once, bounded by the configured timeout.
    ///
    /// A failed check also takes the layer offline: `is_online` is never left
    /// set while the backend is known to be unreachable.
    pub async fn check(&self, backend: &dyn Backend) -> ConnectionStatus {
        let outcome = match tokio::time::timeout(self.timeout, backend.health_check()).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.timeout)),
        };

        let mut status = self.status.lock().await;
        status.last_checked = Some(Utc::now());
        match outcome {
            Ok(()) => {
                if status.error_count > 0 {
                    tracing::info!(
                        previous_failures = status.error_count,
                        "backend reachable again"
                    );
                }
                status.backend_connected = true;
                status.error_count = 0;
            }
            Err(e) => {
                status.backend_connected = false;
                status.is_online = false;
                status.error_count = status.error_count.saturating_add(1);
                tracing::warn!(
                    error = %e,
                    error_count = status.error_count,
                    "backend health check failed"
                );
            }
        }
        status.clone()
    }

    /// Route writes to the backend. Only allowed while the last check
    /// succeeded.
    pub async fn set_online(&self) -> bool {
        let mut status = self.status.lock().await;
        status.is_online = status.backend_connected;
        status.is_online
    }

    /// Optimistic switch used by `force_online_mode` before the real check.
    pub(crate) async fn set_online_optimistic(&self) {
        self.status.lock().await.is_online = true;
    }

    pub async fn set_offline(&self) {
        self.status.lock().await.is_online = false;
    }

    /// Record a failure observed outside a health check (a write or replay
    /// that could not reach the backend).
    pub async fn record_failure(&self, error: &BackendError) {
        let mut status = self.status.lock().await;
        status.backend_connected = false;
        status.is_online = false;
        status.error_count = status.error_count.saturating_add(1);
        status.last_checked = Some(Utc::now());
        tracing::warn!(
            error = %error,
            error_count = status.error_count,
            "backend call failed; switching to offline mode"
        );
    }
}

/// Doubling delay between failed checks, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; the following call returns twice as much (capped).
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}
