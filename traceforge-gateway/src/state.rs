use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use traceforge_adapters::Adapter;
use traceforge_core::config::GatewayConfig;
use traceforge_core::provider_router::ProviderType;
use traceforge_observability::MetricsCollector;
use traceforge_store::{CircuitBreaker, TraceRecorder};
use traceforge_vcr::Vcr;

use crate::rate_limiter::RateLimiter;

/// Everything a request handler needs, assembled once at startup by
/// `traceforge-server` and shared (via `axum`'s `State` extractor, cloned
/// as cheap `Arc` handles) across every in-flight request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub adapters: Arc<HashMap<ProviderType, Arc<dyn Adapter>>>,
    pub vcr: Arc<Vcr>,
    pub recorder: Arc<TraceRecorder>,
    pub breaker: Arc<CircuitBreaker>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<MetricsCollector>,
    /// Root directory the file backend (or the sqlite file's parent)
    /// writes under — probed by `/health` for write access.
    pub storage_root: PathBuf,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn adapter_for(&self, provider_type: ProviderType) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(&provider_type).cloned()
    }
}
