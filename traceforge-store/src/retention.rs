use std::sync::Arc;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreaker;
use crate::types::StorageBackend;

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub enabled: bool,
    pub check_interval_seconds: u64,
    pub max_age: Option<chrono::Duration>,
    pub max_count: Option<u64>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: 6 * 60 * 60,
            max_age: None,
            max_count: None,
        }
    }
}

/// Periodic sweep (§4.5). Runs one cleanup immediately on start, then every
/// `check_interval_seconds`. A run is skipped (with a warning, not a crash)
/// while the circuit breaker is open, since the backend is presumed
/// unhealthy at that point.
pub struct RetentionManager {
    backend: Arc<dyn StorageBackend>,
    breaker: Arc<CircuitBreaker>,
    policy: RetentionPolicy,
}

impl RetentionManager {
    pub fn new(backend: Arc<dyn StorageBackend>, breaker: Arc<CircuitBreaker>, policy: RetentionPolicy) -> Self {
        Self { backend, breaker, policy }
    }

    /// Spawn the retention loop as a background task. Returns immediately;
    /// the task runs until the process exits or the handle is aborted.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if !self.policy.enabled {
                return;
            }
            self.run_once().await;
            let mut ticker = tokio::time::interval(Duration::from_secs(self.policy.check_interval_seconds));
            ticker.tick().await; // consume the immediate first tick
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }

    async fn run_once(&self) {
        if self.breaker.is_open() {
            tracing::warn!("retention sweep skipped: circuit breaker is open");
            return;
        }
        match self.backend.cleanup(self.policy.max_age, self.policy.max_count).await {
            Ok(deleted) => {
                if deleted > 0 {
                    tracing::info!(deleted, "retention sweep removed stale traces");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "retention sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_backend::FileBackend;
    use tempfile::tempdir;

    #[tokio::test]
    async fn run_once_skips_when_circuit_is_open() {
        let dir = tempdir().unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(FileBackend::new(dir.path()).unwrap());
        let breaker = Arc::new(CircuitBreaker::new());
        for _ in 0..10 {
            breaker.record_failure();
        }
        assert!(breaker.is_open());

        let manager = RetentionManager::new(backend.clone(), breaker, RetentionPolicy::default());
        // Should not panic even though the breaker is open; cleanup is
        // simply skipped with a warning.
        manager.run_once().await;
    }

    #[tokio::test]
    async fn run_once_invokes_cleanup_when_closed() {
        let dir = tempdir().unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(FileBackend::new(dir.path()).unwrap());
        let breaker = Arc::new(CircuitBreaker::new());
        let policy = RetentionPolicy {
            max_count: Some(0),
            ..Default::default()
        };
        let manager = RetentionManager::new(backend.clone(), breaker, policy);
        manager.run_once().await;
        assert_eq!(backend.count_traces().await.unwrap(), 0);
    }
}
