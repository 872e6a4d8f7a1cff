use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use traceforge_core::error::GatewayError;
use traceforge_core::trace::{Test, Trace};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Timestamp,
    Duration,
    Model,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOptions {
    pub limit: usize,
    pub offset: usize,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    #[serde(default)]
    pub filter: ListFilter,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            sort_by: SortBy::Timestamp,
            sort_order: SortOrder::Desc,
            filter: ListFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub trace_count: u64,
    pub first_seen: chrono::DateTime<chrono::Utc>,
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub trace: Trace,
    pub rank: f64,
}

pub type StoreResult<T> = Result<T, GatewayError>;

/// Capability set shared by every backend variant (file, indexed, or the
/// retrying manager wrapper). Search is optional: backends that can't
/// support full-text queries return `GatewayError::Storage` with an
/// explanatory message rather than panicking.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn save_trace(&self, trace: &Trace) -> StoreResult<()>;
    async fn get_trace(&self, id: Uuid) -> StoreResult<Option<Trace>>;
    async fn list_traces(&self, opts: &ListOptions) -> StoreResult<Vec<Trace>>;
    async fn delete_trace(&self, id: Uuid) -> StoreResult<()>;
    async fn count_traces(&self) -> StoreResult<u64>;

    async fn list_traces_by_session(&self, session_id: &str) -> StoreResult<Vec<Trace>>;
    async fn session_metadata(&self, session_id: &str) -> StoreResult<Option<SessionMetadata>>;

    async fn save_test(&self, test: &Test) -> StoreResult<()>;
    async fn get_test(&self, id: Uuid) -> StoreResult<Option<Test>>;
    async fn list_tests(&self, opts: &ListOptions) -> StoreResult<Vec<Test>>;
    async fn delete_test(&self, id: Uuid) -> StoreResult<()>;

    async fn cleanup(&self, max_age: Option<chrono::Duration>, max_count: Option<u64>) -> StoreResult<u64>;

    async fn search(&self, _query: &str, _opts: &ListOptions) -> StoreResult<Vec<SearchResult>> {
        Err(GatewayError::Storage("full-text search not supported by this backend".into()))
    }
    async fn search_count(&self, _query: &str) -> StoreResult<u64> {
        Err(GatewayError::Storage("full-text search not supported by this backend".into()))
    }
    async fn search_suggest(&self, _prefix: &str, _limit: usize) -> StoreResult<Vec<String>> {
        Err(GatewayError::Storage("full-text search not supported by this backend".into()))
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}
