use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;
use std::time::Duration;
use traceforge_core::config::ProviderEntry;
use traceforge_core::error::GatewayError;
use traceforge_core::session::SessionContext;

pub const UPSTREAM_DEADLINE: Duration = Duration::from_secs(30);

/// Outcome of one upstream dispatch, already normalized to the OpenAI
/// chat-completion shape (§3, §4.9).
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub status: u16,
    pub body: Value,
    pub upstream_duration_ms: u64,
}

/// A forwarded upstream byte stream, for providers whose wire format is
/// already SSE-shaped and needs no per-chunk translation.
pub type ByteStream = BoxStream<'static, Result<Bytes, GatewayError>>;

/// One upstream dialect. `dispatch` never leaks adapter internals (raw
/// upstream error bodies, connection details) to the client — failures are
/// mapped to `GatewayError::Provider`/`Transport`/`Timeout`.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn dispatch(
        &self,
        endpoint: &str,
        request: &Value,
        provider_cfg: Option<&ProviderEntry>,
        session_ctx: &SessionContext,
    ) -> Result<DispatchResult, GatewayError>;

    /// The endpoint string recorded on a `Trace` (§3: "annotated with
    /// provider when normalized"). Passthrough adapters (OpenAI-compatible)
    /// return `inbound_endpoint` unchanged; adapters that translate the
    /// request into a different upstream dialect override this to name
    /// their native wire endpoint plus provider, e.g. `/v1/messages
    /// (Anthropic)`.
    fn trace_endpoint(&self, inbound_endpoint: &str, _request: &Value) -> String {
        inbound_endpoint.to_string()
    }

    /// Whether `dispatch_stream` is implemented for this adapter. Adapters
    /// whose native wire format requires per-chunk translation (Anthropic,
    /// Gemini, Ollama) report `false`; the gateway falls back to a single
    /// buffered dispatch wrapped in one synthetic SSE chunk for those.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Forward the upstream's chunked response as-is. Only called when
    /// `supports_streaming()` is `true`.
    async fn dispatch_stream(
        &self,
        _endpoint: &str,
        _request: &Value,
        _provider_cfg: Option<&ProviderEntry>,
        _session_ctx: &SessionContext,
    ) -> Result<ByteStream, GatewayError> {
        Err(GatewayError::Transport(
            "streaming not supported by this adapter".to_string(),
        ))
    }
}

pub(crate) fn api_key_for(provider_cfg: Option<&ProviderEntry>, fallback_env_var: &str) -> Option<String> {
    let env_var = provider_cfg
        .and_then(|p| p.api_key_env_var.as_deref())
        .unwrap_or(fallback_env_var);
    std::env::var(env_var).ok()
}

pub(crate) fn base_url(provider_cfg: Option<&ProviderEntry>, default: &str) -> String {
    provider_cfg.map(|p| p.base_url.clone()).unwrap_or_else(|| default.to_string())
}
