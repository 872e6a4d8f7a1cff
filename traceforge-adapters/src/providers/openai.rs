use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::time::Instant;
use traceforge_core::config::ProviderEntry;
use traceforge_core::error::GatewayError;
use traceforge_core::session::SessionContext;

use crate::adapter::{api_key_for, base_url, Adapter, ByteStream, DispatchResult, UPSTREAM_DEADLINE};

/// Passthrough adapter: the client body is already in the native OpenAI
/// shape, so no translation happens in either direction.
pub struct OpenAiAdapter {
    client: reqwest::Client,
    default_base_url: String,
    default_api_key_env_var: String,
}

impl OpenAiAdapter {
    pub fn new(default_base_url: impl Into<String>, default_api_key_env_var: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_base_url: default_base_url.into(),
            default_api_key_env_var: default_api_key_env_var.into(),
        }
    }
}

#[async_trait]
impl Adapter for OpenAiAdapter {
    async fn dispatch(
        &self,
        endpoint: &str,
        request: &Value,
        provider_cfg: Option<&ProviderEntry>,
        _session_ctx: &SessionContext,
    ) -> Result<DispatchResult, GatewayError> {
        let url = format!("{}{}", base_url(provider_cfg, &self.default_base_url), endpoint);
        let api_key = api_key_for(provider_cfg, &self.default_api_key_env_var);

        let mut builder = self.client.post(&url).json(request).timeout(UPSTREAM_DEADLINE);
        if let Some(key) = api_key {
            builder = builder.bearer_auth(key);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body: Value = response.json().await.map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(DispatchResult {
            status,
            body,
            upstream_duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// The OpenAI wire shape is already the client-facing shape, so
    /// streamed chunks need no per-chunk translation — just forwarding.
    fn supports_streaming(&self) -> bool {
        true
    }

    async fn dispatch_stream(
        &self,
        endpoint: &str,
        request: &Value,
        provider_cfg: Option<&ProviderEntry>,
        _session_ctx: &SessionContext,
    ) -> Result<ByteStream, GatewayError> {
        let url = format!("{}{}", base_url(provider_cfg, &self.default_base_url), endpoint);
        let api_key = api_key_for(provider_cfg, &self.default_api_key_env_var);

        let mut builder = self.client.post(&url).json(request).timeout(UPSTREAM_DEADLINE);
        if let Some(key) = api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider { status: status.as_u16(), message: body });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| GatewayError::Transport(e.to_string())));
        Ok(Box::pin(stream))
    }
}

pub(crate) fn map_reqwest_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(UPSTREAM_DEADLINE.as_millis() as u64)
    } else {
        GatewayError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_base_url_is_used_when_no_provider_entry_configured() {
        let adapter = OpenAiAdapter::new("https://api.openai.com/v1", "OPENAI_API_KEY");
        assert_eq!(adapter.default_base_url, "https://api.openai.com/v1");
    }
}
