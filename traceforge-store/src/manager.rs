use async_trait::async_trait;
use std::time::Duration;
use traceforge_core::trace::{Test, Trace};
use uuid::Uuid;

use crate::types::{ListOptions, SearchResult, SessionMetadata, StorageBackend, StoreResult};

/// Composable retrying wrapper (§4.3 "Manager variant"). Wraps a primary
/// backend and an ordered list of fallbacks; each operation retries the
/// primary `retry_attempts` times with a linear `retry_delay` before
/// falling through. A write that succeeds on a fallback is never replayed
/// back to the primary — the caller sees success and moves on.
pub struct BackendManager {
    primary: Box<dyn StorageBackend>,
    fallbacks: Vec<Box<dyn StorageBackend>>,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl BackendManager {
    pub fn new(primary: Box<dyn StorageBackend>, fallbacks: Vec<Box<dyn StorageBackend>>) -> Self {
        Self {
            primary,
            fallbacks,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }

    pub fn with_retry_policy(mut self, retry_attempts: u32, retry_delay: Duration) -> Self {
        self.retry_attempts = retry_attempts;
        self.retry_delay = retry_delay;
        self
    }

    /// Run `op` against the primary up to `retry_attempts` times (linear
    /// backoff between tries), then against each fallback in order. The
    /// first success wins; if every backend fails, the primary's last
    /// error is returned.
    async fn with_fallback<'a, T, F>(&'a self, op: F) -> StoreResult<T>
    where
        F: Fn(&'a dyn StorageBackend) -> std::pin::Pin<Box<dyn std::future::Future<Output = StoreResult<T>> + Send + 'a>>,
    {
        let mut last_err = None;
        for attempt in 0..self.retry_attempts.max(1) {
            match op(self.primary.as_ref()).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "primary storage backend failed");
                    last_err = Some(e);
                    if attempt + 1 < self.retry_attempts {
                        tokio::time::sleep(self.retry_delay * (attempt + 1)).await;
                    }
                }
            }
        }

        for fallback in &self.fallbacks {
            match op(fallback.as_ref()).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    tracing::warn!(error = %e, "fallback storage backend failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.expect("retry_attempts.max(1) guarantees at least one attempt"))
    }
}

#[async_trait]
impl StorageBackend for BackendManager {
    async fn save_trace(&self, trace: &Trace) -> StoreResult<()> {
        self.with_fallback(|b| Box::pin(async move { b.save_trace(trace).await })).await
    }

    async fn get_trace(&self, id: Uuid) -> StoreResult<Option<Trace>> {
        self.with_fallback(|b| Box::pin(async move { b.get_trace(id).await })).await
    }

    async fn list_traces(&self, opts: &ListOptions) -> StoreResult<Vec<Trace>> {
        self.with_fallback(|b| Box::pin(async move { b.list_traces(opts).await })).await
    }

    async fn delete_trace(&self, id: Uuid) -> StoreResult<()> {
        self.with_fallback(|b| Box::pin(async move { b.delete_trace(id).await })).await
    }

    async fn count_traces(&self) -> StoreResult<u64> {
        self.with_fallback(|b| Box::pin(async move { b.count_traces().await })).await
    }

    async fn list_traces_by_session(&self, session_id: &str) -> StoreResult<Vec<Trace>> {
        self.with_fallback(|b| Box::pin(async move { b.list_traces_by_session(session_id).await }))
            .await
    }

    async fn session_metadata(&self, session_id: &str) -> StoreResult<Option<SessionMetadata>> {
        self.with_fallback(|b| Box::pin(async move { b.session_metadata(session_id).await }))
            .await
    }

    async fn save_test(&self, test: &Test) -> StoreResult<()> {
        self.with_fallback(|b| Box::pin(async move { b.save_test(test).await })).await
    }

    async fn get_test(&self, id: Uuid) -> StoreResult<Option<Test>> {
        self.with_fallback(|b| Box::pin(async move { b.get_test(id).await })).await
    }

    async fn list_tests(&self, opts: &ListOptions) -> StoreResult<Vec<Test>> {
        self.with_fallback(|b| Box::pin(async move { b.list_tests(opts).await })).await
    }

    async fn delete_test(&self, id: Uuid) -> StoreResult<()> {
        self.with_fallback(|b| Box::pin(async move { b.delete_test(id).await })).await
    }

    async fn cleanup(&self, max_age: Option<chrono::Duration>, max_count: Option<u64>) -> StoreResult<u64> {
        self.with_fallback(|b| Box::pin(async move { b.cleanup(max_age, max_count).await }))
            .await
    }

    async fn search(&self, query: &str, opts: &ListOptions) -> StoreResult<Vec<SearchResult>> {
        self.with_fallback(|b| Box::pin(async move { b.search(query, opts).await })).await
    }

    async fn search_count(&self, query: &str) -> StoreResult<u64> {
        self.with_fallback(|b| Box::pin(async move { b.search_count(query).await })).await
    }

    async fn search_suggest(&self, prefix: &str, limit: usize) -> StoreResult<Vec<String>> {
        self.with_fallback(|b| Box::pin(async move { b.search_suggest(prefix, limit).await }))
            .await
    }

    async fn close(&self) -> StoreResult<()> {
        self.primary.close().await?;
        for fb in &self.fallbacks {
            fb.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_backend::FileBackend;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn falls_through_to_fallback_when_primary_dir_is_removed() {
        let primary_dir = tempdir().unwrap();
        let primary_path = primary_dir.path().to_path_buf();
        let primary = FileBackend::new(&primary_path).unwrap();
        // Remove the directory backing `primary` after construction so
        // every write it attempts fails.
        std::fs::remove_dir_all(&primary_path).unwrap();

        let fallback_dir = tempdir().unwrap();
        let fallback = FileBackend::new(fallback_dir.path()).unwrap();

        let manager = BackendManager::new(Box::new(primary), vec![Box::new(fallback)])
            .with_retry_policy(1, Duration::from_millis(1));

        let trace = Trace::new_success(
            "/v1/chat/completions",
            json!({"model": "gpt-4"}),
            json!({"choices": []}),
            5,
            Some("gpt-4".into()),
            None,
        );
        manager.save_trace(&trace).await.unwrap();

        let from_fallback = FileBackend::new(fallback_dir.path()).unwrap();
        assert!(from_fallback.get_trace(trace.id).await.unwrap().is_some());
    }
}
