use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use traceforge_core::error::GatewayError;
use traceforge_core::trace::{migrate, Test, Trace, TraceStatus};
use uuid::Uuid;

use crate::types::{ListOptions, SearchResult, SessionMetadata, SortBy, SortOrder, StorageBackend, StoreResult};

const SCHEMA: &str = "
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=NORMAL;

    CREATE TABLE IF NOT EXISTS traces (
        id TEXT PRIMARY KEY,
        timestamp TEXT NOT NULL,
        endpoint TEXT NOT NULL,
        model TEXT,
        status TEXT NOT NULL,
        duration_ms INTEGER NOT NULL,
        session_id TEXT,
        step_index INTEGER,
        created_at TEXT NOT NULL,
        data TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_traces_timestamp ON traces(timestamp DESC);
    CREATE INDEX IF NOT EXISTS idx_traces_model ON traces(model);
    CREATE INDEX IF NOT EXISTS idx_traces_status ON traces(status);
    CREATE INDEX IF NOT EXISTS idx_traces_created_at ON traces(created_at);
    CREATE INDEX IF NOT EXISTS idx_traces_session ON traces(session_id);
    CREATE INDEX IF NOT EXISTS idx_traces_session_step ON traces(session_id, step_index);

    CREATE VIRTUAL TABLE IF NOT EXISTS traces_fts USING fts5(
        id UNINDEXED,
        endpoint,
        request_text,
        response_text,
        model,
        content='',
        content_rowid='rowid'
    );

    CREATE TRIGGER IF NOT EXISTS traces_fts_insert AFTER INSERT ON traces BEGIN
        INSERT INTO traces_fts(rowid, id, endpoint, request_text, response_text, model)
        VALUES (NEW.rowid, NEW.id, NEW.endpoint, NEW.data, NEW.data, NEW.model);
    END;
    CREATE TRIGGER IF NOT EXISTS traces_fts_delete AFTER DELETE ON traces BEGIN
        INSERT INTO traces_fts(traces_fts, rowid, id, endpoint, request_text, response_text, model)
        VALUES ('delete', OLD.rowid, OLD.id, OLD.endpoint, OLD.data, OLD.data, OLD.model);
    END;
    CREATE TRIGGER IF NOT EXISTS traces_fts_update AFTER UPDATE ON traces BEGIN
        INSERT INTO traces_fts(traces_fts, rowid, id, endpoint, request_text, response_text, model)
        VALUES ('delete', OLD.rowid, OLD.id, OLD.endpoint, OLD.data, OLD.data, OLD.model);
        INSERT INTO traces_fts(rowid, id, endpoint, request_text, response_text, model)
        VALUES (NEW.rowid, NEW.id, NEW.endpoint, NEW.data, NEW.data, NEW.model);
    END;

    CREATE TABLE IF NOT EXISTS tests (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        data TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS redaction_audit (
        trace_id TEXT NOT NULL,
        field_path TEXT NOT NULL,
        hash_of_masked_value TEXT NOT NULL,
        redaction_type TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        user TEXT,
        reversible INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_redaction_audit_trace ON redaction_audit(trace_id);
";

/// Single embedded relational store (§4.3 indexed variant), backed by
/// `rusqlite` behind an `r2d2` connection pool so blocking SQLite calls
/// don't serialize on a single `Mutex<Connection>` under concurrent load.
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteBackend {
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = Pool::new(manager).map_err(|e| GatewayError::Storage(e.to_string()))?;
        {
            let conn = pool.get().map_err(|e| GatewayError::Storage(e.to_string()))?;
            conn.execute_batch(SCHEMA)?;
        }
        Ok(Self { pool })
    }

    fn conn(&self) -> StoreResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| GatewayError::Storage(e.to_string()))
    }
}

fn status_str(status: TraceStatus) -> &'static str {
    match status {
        TraceStatus::Success => "success",
        TraceStatus::Error => "error",
    }
}

fn row_to_trace(data: String) -> StoreResult<Trace> {
    let value: serde_json::Value = serde_json::from_str(&data)?;
    let (upgraded, warnings) = migrate::upgrade(value);
    for w in warnings {
        tracing::warn!("{w}");
    }
    Ok(serde_json::from_value(upgraded)?)
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn save_trace(&self, trace: &Trace) -> StoreResult<()> {
        let conn = self.conn()?;
        let data = serde_json::to_string(trace)?;
        conn.execute(
            "INSERT OR REPLACE INTO traces
                (id, timestamp, endpoint, model, status, duration_ms, session_id, step_index, created_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                trace.id.to_string(),
                trace.timestamp.to_rfc3339(),
                trace.endpoint,
                trace.metadata.model,
                status_str(trace.metadata.status),
                trace.metadata.duration_ms as i64,
                trace.session_id,
                trace.step_index.map(|i| i as i64),
                chrono::Utc::now().to_rfc3339(),
                data,
            ],
        )?;
        Ok(())
    }

    async fn get_trace(&self, id: Uuid) -> StoreResult<Option<Trace>> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row("SELECT data FROM traces WHERE id = ?1", params![id.to_string()], |r| r.get(0))
            .optional()?;
        data.map(row_to_trace).transpose()
    }

    async fn list_traces(&self, opts: &ListOptions) -> StoreResult<Vec<Trace>> {
        let conn = self.conn()?;
        let order_col = match opts.sort_by {
            SortBy::Timestamp => "timestamp",
            SortBy::Duration => "duration_ms",
            SortBy::Model => "model",
        };
        let direction = match opts.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };

        let mut clauses = Vec::new();
        let mut bind: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(model) = &opts.filter.model {
            clauses.push("model = ?".to_string());
            bind.push(Box::new(model.clone()));
        }
        if let Some(status) = &opts.filter.status {
            clauses.push("status = ?".to_string());
            bind.push(Box::new(status.clone()));
        }
        if let Some(from) = opts.filter.date_from {
            clauses.push("timestamp >= ?".to_string());
            bind.push(Box::new(from.to_rfc3339()));
        }
        if let Some(to) = opts.filter.date_to {
            clauses.push("timestamp <= ?".to_string());
            bind.push(Box::new(to.to_rfc3339()));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let sql = format!(
            "SELECT data FROM traces {where_clause} ORDER BY {order_col} {direction} LIMIT ?{} OFFSET ?{}",
            bind.len() + 1,
            bind.len() + 2
        );
        bind.push(Box::new(opts.limit as i64));
        bind.push(Box::new(opts.offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(params_ref.as_slice(), |r| r.get::<_, String>(0))?;
        let mut traces = Vec::new();
        for row in rows {
            traces.push(row_to_trace(row?)?);
        }
        Ok(traces)
    }

    async fn delete_trace(&self, id: Uuid) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM traces WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }

    async fn count_traces(&self) -> StoreResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM traces", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    async fn list_traces_by_session(&self, session_id: &str) -> StoreResult<Vec<Trace>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT data FROM traces WHERE session_id = ?1 ORDER BY step_index ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |r| r.get::<_, String>(0))?;
        let mut traces = Vec::new();
        for row in rows {
            traces.push(row_to_trace(row?)?);
        }
        Ok(traces)
    }

    async fn session_metadata(&self, session_id: &str) -> StoreResult<Option<SessionMetadata>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM traces WHERE session_id = ?1",
                params![session_id],
                |r| {
                    let count: i64 = r.get(0)?;
                    let min: Option<String> = r.get(1)?;
                    let max: Option<String> = r.get(2)?;
                    Ok((count, min, max))
                },
            )
            .optional()?;
        let Some((count, Some(min), Some(max))) = row else {
            return Ok(None);
        };
        if count == 0 {
            return Ok(None);
        }
        Ok(Some(SessionMetadata {
            session_id: session_id.to_string(),
            trace_count: count as u64,
            first_seen: chrono::DateTime::parse_from_rfc3339(&min)
                .map_err(|e| GatewayError::Storage(e.to_string()))?
                .with_timezone(&chrono::Utc),
            last_seen: chrono::DateTime::parse_from_rfc3339(&max)
                .map_err(|e| GatewayError::Storage(e.to_string()))?
                .with_timezone(&chrono::Utc),
        }))
    }

    async fn save_test(&self, test: &Test) -> StoreResult<()> {
        let conn = self.conn()?;
        let data = serde_json::to_string(test)?;
        conn.execute(
            "INSERT OR REPLACE INTO tests (id, name, data) VALUES (?1, ?2, ?3)",
            params![test.id.to_string(), test.name, data],
        )?;
        Ok(())
    }

    async fn get_test(&self, id: Uuid) -> StoreResult<Option<Test>> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row("SELECT data FROM tests WHERE id = ?1", params![id.to_string()], |r| r.get(0))
            .optional()?;
        data.map(|d| Ok(serde_json::from_str(&d)?)).transpose()
    }

    async fn list_tests(&self, opts: &ListOptions) -> StoreResult<Vec<Test>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT data FROM tests ORDER BY id LIMIT ?1 OFFSET ?2")?;
        let rows = stmt.query_map(params![opts.limit as i64, opts.offset as i64], |r| r.get::<_, String>(0))?;
        let mut tests = Vec::new();
        for row in rows {
            tests.push(serde_json::from_str(&row?)?);
        }
        Ok(tests)
    }

    async fn delete_test(&self, id: Uuid) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM tests WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }

    async fn cleanup(&self, max_age: Option<chrono::Duration>, max_count: Option<u64>) -> StoreResult<u64> {
        let conn = self.conn()?;
        let mut deleted = 0u64;

        if let Some(max_age) = max_age {
            let cutoff = (chrono::Utc::now() - max_age).to_rfc3339();
            deleted += conn.execute("DELETE FROM traces WHERE timestamp < ?1", params![cutoff])? as u64;
        }

        if let Some(max_count) = max_count {
            deleted += conn.execute(
                "DELETE FROM traces WHERE id NOT IN (
                    SELECT id FROM traces ORDER BY timestamp DESC LIMIT ?1
                )",
                params![max_count as i64],
            )? as u64;
        }

        Ok(deleted)
    }

    async fn search(&self, query: &str, opts: &ListOptions) -> StoreResult<Vec<SearchResult>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT t.data, bm25(traces_fts) AS rank
             FROM traces_fts
             JOIN traces t ON t.id = traces_fts.id
             WHERE traces_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![query, opts.limit as i64, opts.offset as i64], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })?;
        let mut results = Vec::new();
        for row in rows {
            let (data, rank) = row?;
            results.push(SearchResult { trace: row_to_trace(data)?, rank });
        }
        Ok(results)
    }

    async fn search_count(&self, query: &str) -> StoreResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM traces_fts WHERE traces_fts MATCH ?1",
            params![query],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    async fn search_suggest(&self, prefix: &str, limit: usize) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT model FROM traces WHERE model LIKE ?1 LIMIT ?2",
        )?;
        let pattern = format!("{prefix}%");
        let rows = stmt.query_map(params![pattern, limit as i64], |r| r.get::<_, Option<String>>(0))?;
        let mut out = Vec::new();
        for row in rows {
            if let Some(model) = row? {
                out.push(model);
            }
        }
        Ok(out)
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
            json!({"model": "gpt-4", "messages": [{"role": "user", "content": "hello there"}]}),
            json!({"choices": [{"message": {"content": "hi"}}]}),
            10,
            Some("gpt-4".into()),
            Some(5),
        )
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let backend = SqliteBackend::new(dir.path().join("traces.db")).unwrap();
        let trace = sample_trace();
        backend.save_trace(&trace).await.unwrap();
        let loaded = backend.get_trace(trace.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, trace.id);
    }

    #[tokio::test]
    async fn list_filters_by_model() {
        let dir = tempdir().unwrap();
        let backend = SqliteBackend::new(dir.path().join("traces.db")).unwrap();
        backend.save_trace(&sample_trace()).await.unwrap();
        let mut other = sample_trace();
        other.metadata.model = Some("claude-3".into());
        backend.save_trace(&other).await.unwrap();

        let opts = ListOptions {
            filter: crate::types::ListFilter {
                model: Some("gpt-4".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let results = backend.list_traces(&opts).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.model.as_deref(), Some("gpt-4"));
    }

    #[tokio::test]
    async fn full_text_search_finds_message_content() {
        let dir = tempdir().unwrap();
        let backend = SqliteBackend::new(dir.path().join("traces.db")).unwrap();
        backend.save_trace(&sample_trace()).await.unwrap();
        let hits = backend.search("hello", &ListOptions::default()).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_trace_removes_it_from_search() {
        let dir = tempdir().unwrap();
        let backend = SqliteBackend::new(dir.path().join("traces.db")).unwrap();
        let trace = sample_trace();
        backend.save_trace(&trace).await.unwrap();
        backend.delete_trace(trace.id).await.unwrap();
        let hits = backend.search("hello", &ListOptions::default()).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn cleanup_enforces_max_count() {
        let dir = tempdir().unwrap();
        let backend = SqliteBackend::new(dir.path().join("traces.db")).unwrap();
        for _ in 0..5 {
            backend.save_trace(&sample_trace()).await.unwrap();
        }
        let deleted = backend.cleanup(None, Some(2)).await.unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(backend.count_traces().await.unwrap(), 2);
    }
}
