use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use traceforge_core::error::GatewayError;
use traceforge_core::trace::{migrate, Test, Trace};
use uuid::Uuid;

use crate::types::{ListFilter, ListOptions, SessionMetadata, SortBy, SortOrder, StorageBackend, StoreResult};

/// One file per trace at `<root>/<ISO-timestamp>_<uuid>.json` (§6.4).
/// Writes go to a `.tmp.<nonce>` sibling and are atomically renamed in,
/// so a reader never observes a partial file.
pub struct FileBackend {
    traces_dir: PathBuf,
    tests_dir: PathBuf,
    nonce: AtomicU64,
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

impl FileBackend {
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref();
        Self::with_tests_dir(root, root.join(".tests"))
    }

    /// Like `new`, but stores tests under `tests_dir` instead of
    /// `<root>/.tests` — lets `storage.tests_dir` (§6.5, `TRACEFORGE_TESTS_DIR`)
    /// point tests at a directory independent of where traces live.
    pub fn with_tests_dir(root: impl AsRef<Path>, tests_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let traces_dir = root.as_ref().join(".traces");
        let tests_dir = tests_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&traces_dir)?;
        std::fs::create_dir_all(&tests_dir)?;
        Ok(Self {
            traces_dir,
            tests_dir,
            nonce: AtomicU64::new(0),
        })
    }

    fn trace_path(&self, id: Uuid, timestamp: chrono::DateTime<chrono::Utc>) -> PathBuf {
        self.traces_dir
            .join(format!("{}_{}.json", timestamp.to_rfc3339(), id))
    }

    fn test_path(&self, id: Uuid) -> PathBuf {
        self.tests_dir.join(format!("{id}.json"))
    }

    fn write_atomic(&self, path: &Path, body: &Value) -> StoreResult<()> {
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp.{nonce}"));
        let rendered = serde_json::to_vec_pretty(&canonicalize(body))?;
        std::fs::write(&tmp, rendered)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Scan `.traces/`, newest-first by filename (which sorts
    /// lexicographically the same as the embedded ISO timestamp).
    fn scan_trace_files(&self) -> StoreResult<Vec<PathBuf>> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&self.traces_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect();
        entries.sort();
        entries.reverse();
        Ok(entries)
    }

    fn load_trace_file(&self, path: &Path) -> StoreResult<Option<Trace>> {
        let Ok(raw) = std::fs::read(path) else {
            return Ok(None);
        };
        let value: Value = serde_json::from_slice(&raw)?;
        let (upgraded, warnings) = migrate::upgrade(value);
        for w in warnings {
            tracing::warn!(file = %path.display(), "{w}");
        }
        let trace: Trace = serde_json::from_value(upgraded)?;
        Ok(Some(trace))
    }
}

fn matches_filter(trace: &Trace, filter: &ListFilter) -> bool {
    if let Some(model) = &filter.model {
        if trace.metadata.model.as_deref() != Some(model.as_str()) {
            return false;
        }
    }
    if let Some(status) = &filter.status {
        let trace_status = match trace.metadata.status {
            traceforge_core::trace::TraceStatus::Success => "success",
            traceforge_core::trace::TraceStatus::Error => "error",
        };
        if trace_status != status {
            return false;
        }
    }
    if let Some(from) = filter.date_from {
        if trace.timestamp < from {
            return false;
        }
    }
    if let Some(to) = filter.date_to {
        if trace.timestamp > to {
            return false;
        }
    }
    true
}

fn sort_traces(traces: &mut [Trace], sort_by: SortBy, order: SortOrder) {
    traces.sort_by(|a, b| {
        let cmp = match sort_by {
            SortBy::Timestamp => a.timestamp.cmp(&b.timestamp),
            SortBy::Duration => a.metadata.duration_ms.cmp(&b.metadata.duration_ms),
            SortBy::Model => a.metadata.model.cmp(&b.metadata.model),
        };
        match order {
            SortOrder::Asc => cmp,
            SortOrder::Desc => cmp.reverse(),
        }
    });
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn save_trace(&self, trace: &Trace) -> StoreResult<()> {
        let path = self.trace_path(trace.id, trace.timestamp);
        let body = serde_json::to_value(trace)?;
        self.write_atomic(&path, &body)
    }

    async fn get_trace(&self, id: Uuid) -> StoreResult<Option<Trace>> {
        for path in self.scan_trace_files()? {
            if path.to_string_lossy().contains(&id.to_string()) {
                return self.load_trace_file(&path);
            }
        }
        Ok(None)
    }

    async fn list_traces(&self, opts: &ListOptions) -> StoreResult<Vec<Trace>> {
        let mut traces = Vec::new();
        for path in self.scan_trace_files()? {
            if let Some(trace) = self.load_trace_file(&path)? {
                if matches_filter(&trace, &opts.filter) {
                    traces.push(trace);
                }
            }
        }
        sort_traces(&mut traces, opts.sort_by, opts.sort_order);
        let page = traces.into_iter().skip(opts.offset).take(opts.limit).collect();
        Ok(page)
    }

    async fn delete_trace(&self, id: Uuid) -> StoreResult<()> {
        for path in self.scan_trace_files()? {
            if path.to_string_lossy().contains(&id.to_string()) {
                std::fs::remove_file(&path)?;
                return Ok(());
            }
        }
        Ok(())
    }

    async fn count_traces(&self) -> StoreResult<u64> {
        Ok(self.scan_trace_files()?.len() as u64)
    }

    async fn list_traces_by_session(&self, session_id: &str) -> StoreResult<Vec<Trace>> {
        let mut traces: Vec<Trace> = self
            .scan_trace_files()?
            .into_iter()
            .filter_map(|p| self.load_trace_file(&p).ok().flatten())
            .filter(|t| t.session_id.as_deref() == Some(session_id))
            .collect();
        traces.sort_by_key(|t| t.step_index.unwrap_or(0));
        Ok(traces)
    }

    async fn session_metadata(&self, session_id: &str) -> StoreResult<Option<SessionMetadata>> {
        let traces = self.list_traces_by_session(session_id).await?;
        if traces.is_empty() {
            return Ok(None);
        }
        let first_seen = traces.iter().map(|t| t.timestamp).min().unwrap();
        let last_seen = traces.iter().map(|t| t.timestamp).max().unwrap();
        Ok(Some(SessionMetadata {
            session_id: session_id.to_string(),
            trace_count: traces.len() as u64,
            first_seen,
            last_seen,
        }))
    }

    async fn save_test(&self, test: &Test) -> StoreResult<()> {
        let path = self.test_path(test.id);
        let body = serde_json::to_value(test)?;
        self.write_atomic(&path, &body)
    }

    async fn get_test(&self, id: Uuid) -> StoreResult<Option<Test>> {
        let path = self.test_path(id);
        let Ok(raw) = std::fs::read(&path) else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    async fn list_tests(&self, opts: &ListOptions) -> StoreResult<Vec<Test>> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&self.tests_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        entries.sort();
        let mut tests = Vec::new();
        for path in entries {
            if let Ok(raw) = std::fs::read(&path) {
                if let Ok(test) = serde_json::from_slice(&raw) {
                    tests.push(test);
                }
            }
        }
        Ok(tests.into_iter().skip(opts.offset).take(opts.limit).collect())
    }

    async fn delete_test(&self, id: Uuid) -> StoreResult<()> {
        let path = self.test_path(id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    async fn cleanup(&self, max_age: Option<chrono::Duration>, max_count: Option<u64>) -> StoreResult<u64> {
        let mut paths = self.scan_trace_files()?;
        let now = chrono::Utc::now();
        let mut deleted = 0u64;

        if let Some(max_age) = max_age {
            let cutoff = now - max_age;
            let mut kept = Vec::new();
            for path in paths {
                let stale = self
                    .load_trace_file(&path)
                    .ok()
                    .flatten()
                    .map(|t| t.timestamp < cutoff)
                    .unwrap_or(false);
                if stale {
                    std::fs::remove_file(&path).map_err(GatewayError::from)?;
                    deleted += 1;
                } else {
                    kept.push(path);
                }
            }
            paths = kept;
        }

        if let Some(max_count) = max_count {
            let max_count = max_count as usize;
            if paths.len() > max_count {
                for path in paths.split_off(max_count) {
                    std::fs::remove_file(&path).map_err(GatewayError::from)?;
                    deleted += 1;
                }
            }
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_trace() -> Trace {
        Trace::new_success(
            "/v1/chat/completions",
            json!({"model": "gpt-4"}),
            json!({"choices": []}),
            10,
            Some("gpt-4".into()),
            Some(5),
        )
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        let trace = sample_trace();
        backend.save_trace(&trace).await.unwrap();
        let loaded = backend.get_trace(trace.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, trace.id);
    }

    #[tokio::test]
    async fn missing_trace_id_returns_none() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        assert!(backend.get_trace(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_respects_limit_and_offset() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        for _ in 0..5 {
            backend.save_trace(&sample_trace()).await.unwrap();
        }
        let opts = ListOptions {
            limit: 2,
            offset: 1,
            ..Default::default()
        };
        let page = backend.list_traces(&opts).await.unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_the_file() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        let trace = sample_trace();
        backend.save_trace(&trace).await.unwrap();
        backend.delete_trace(trace.id).await.unwrap();
        assert!(backend.get_trace(trace.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_enforces_max_count() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        for _ in 0..5 {
            backend.save_trace(&sample_trace()).await.unwrap();
        }
        let deleted = backend.cleanup(None, Some(2)).await.unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(backend.count_traces().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn session_traces_sorted_by_step_index() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        let mut t1 = sample_trace();
        t1.session_id = Some("sess-1".into());
        t1.step_index = Some(2);
        let mut t2 = sample_trace();
        t2.session_id = Some("sess-1".into());
        t2.step_index = Some(1);
        backend.save_trace(&t1).await.unwrap();
        backend.save_trace(&t2).await.unwrap();
        let ordered = backend.list_traces_by_session("sess-1").await.unwrap();
        assert_eq!(ordered[0].step_index, Some(1));
        assert_eq!(ordered[1].step_index, Some(2));
    }

    #[tokio::test]
    async fn with_tests_dir_stores_tests_outside_the_traces_root() {
        let traces_root = tempdir().unwrap();
        let tests_root = tempdir().unwrap();
        let backend = FileBackend::with_tests_dir(traces_root.path(), tests_root.path()).unwrap();

        let test = Test {
            id: Uuid::new_v4(),
            name: "sample".into(),
            request: json!({"model": "gpt-4"}),
            assertions: Vec::new(),
            fixtures: None,
            tags: Vec::new(),
            policy_refs: Vec::new(),
        };
        backend.save_test(&test).await.unwrap();

        assert!(tests_root.path().join(format!("{}.json", test.id)).exists());
        assert!(backend.get_test(test.id).await.unwrap().is_some());
    }
}
