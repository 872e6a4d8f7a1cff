use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Instant;
use traceforge_core::config::ProviderEntry;
use traceforge_core::error::GatewayError;
use traceforge_core::session::SessionContext;

use crate::adapter::{base_url, Adapter, DispatchResult, UPSTREAM_DEADLINE};
use crate::providers::openai::map_reqwest_error;

/// Maps the client's OpenAI-shaped chat request onto Ollama's local-host
/// `/api/chat` endpoint. No API key: Ollama is assumed to run on a
/// trusted local or private-network host (§4.9).
pub struct OllamaAdapter {
    client: reqwest::Client,
    default_base_url: String,
}

impl OllamaAdapter {
    pub fn new(default_base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_base_url: default_base_url.into(),
        }
    }
}

fn to_ollama_request(request: &Value) -> Value {
    let model = request.get("model").cloned().unwrap_or(Value::Null);
    let messages = request.get("messages").cloned().unwrap_or(json!([]));
    json!({
        "model": model,
        "messages": messages,
        "stream": false,
    })
}

fn from_ollama_response(model: &str, response: &Value) -> Value {
    let content = response
        .pointer("/message/content")
        .and_then(Value::as_str)
        .unwrap_or("");

    let prompt_tokens = response.get("prompt_eval_count").and_then(Value::as_u64).unwrap_or(0);
    let completion_tokens = response.get("eval_count").and_then(Value::as_u64).unwrap_or(0);

    json!({
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": if response.get("done").and_then(Value::as_bool).unwrap_or(true) { "stop" } else { "length" },
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens,
        }
    })
}

#[async_trait]
impl Adapter for OllamaAdapter {
    /// Normalized to Ollama's native chat endpoint (§3).
    fn trace_endpoint(&self, _inbound_endpoint: &str, _request: &Value) -> String {
        "/api/chat (Ollama)".to_string()
    }

    async fn dispatch(
        &self,
        _endpoint: &str,
        request: &Value,
        provider_cfg: Option<&ProviderEntry>,
        _session_ctx: &SessionContext,
    ) -> Result<DispatchResult, GatewayError> {
        let url = format!("{}/api/chat", base_url(provider_cfg, &self.default_base_url));
        let upstream_request = to_ollama_request(request);

        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&upstream_request)
            .timeout(UPSTREAM_DEADLINE)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let upstream_body: Value = response.json().await.map_err(|e| GatewayError::Transport(e.to_string()))?;
        let upstream_duration_ms = started.elapsed().as_millis() as u64;

        if status >= 400 {
            let message = upstream_body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("ollama upstream error")
                .to_string();
            return Err(GatewayError::Provider { status, message });
        }

        let model = request.get("model").and_then(Value::as_str).unwrap_or_default();
        Ok(DispatchResult {
            status,
            body: from_ollama_response(model, &upstream_body),
            upstream_duration_ms,
        })
    }
}
