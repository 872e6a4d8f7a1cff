use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Instant;
use traceforge_core::config::ProviderEntry;
use traceforge_core::error::GatewayError;
use traceforge_core::session::SessionContext;

use crate::adapter::{api_key_for, base_url, Adapter, DispatchResult, UPSTREAM_DEADLINE};
use crate::providers::openai::map_reqwest_error;

/// Maps the client's OpenAI-shaped chat request onto Anthropic's Messages
/// API, and normalizes the Messages response back to the OpenAI shape
/// (§4.9): `content[0].text` -> `choices[0].message.content`,
/// `input_tokens`/`output_tokens` -> `prompt_tokens`/`completion_tokens`/
/// `total_tokens`, `stop_reason` -> `finish_reason`.
pub struct AnthropicAdapter {
    client: reqwest::Client,
    default_base_url: String,
    default_api_key_env_var: String,
}

impl AnthropicAdapter {
    pub fn new(default_base_url: impl Into<String>, default_api_key_env_var: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_base_url: default_base_url.into(),
            default_api_key_env_var: default_api_key_env_var.into(),
        }
    }
}

/// Split `system`-role messages out (Anthropic takes system prompt as a
/// top-level field) and translate the rest 1:1.
fn to_anthropic_request(request: &Value) -> Value {
    let model = request.get("model").cloned().unwrap_or(Value::Null);
    let max_tokens = request.get("max_tokens").cloned().unwrap_or(json!(1024));

    let mut system = String::new();
    let mut messages = Vec::new();
    if let Some(arr) = request.get("messages").and_then(Value::as_array) {
        for msg in arr {
            if msg.get("role").and_then(Value::as_str) == Some("system") {
                if let Some(content) = msg.get("content").and_then(Value::as_str) {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(content);
                }
            } else {
                messages.push(msg.clone());
            }
        }
    }

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": messages,
    });
    if !system.is_empty() {
        body["system"] = json!(system);
    }
    if let Some(temp) = request.get("temperature") {
        body["temperature"] = temp.clone();
    }
    body
}

fn finish_reason_from_stop_reason(stop_reason: Option<&str>) -> &'static str {
    match stop_reason {
        Some("end_turn") | Some("stop_sequence") => "stop",
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        _ => "stop",
    }
}

fn from_anthropic_response(model: &str, response: &Value) -> Value {
    let text = response
        .get("content")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|block| block.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("");

    let stop_reason = response.get("stop_reason").and_then(Value::as_str);
    let input_tokens = response.pointer("/usage/input_tokens").and_then(Value::as_u64).unwrap_or(0);
    let output_tokens = response.pointer("/usage/output_tokens").and_then(Value::as_u64).unwrap_or(0);

    json!({
        "id": response.get("id").cloned().unwrap_or(Value::Null),
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": finish_reason_from_stop_reason(stop_reason),
        }],
        "usage": {
            "prompt_tokens": input_tokens,
            "completion_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens,
        }
    })
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    /// Normalized to Anthropic's native messages endpoint (§3, scenario 5).
    fn trace_endpoint(&self, _inbound_endpoint: &str, _request: &Value) -> String {
        "/v1/messages (Anthropic)".to_string()
    }

    async fn dispatch(
        &self,
        _endpoint: &str,
        request: &Value,
        provider_cfg: Option<&ProviderEntry>,
        _session_ctx: &SessionContext,
    ) -> Result<DispatchResult, GatewayError> {
        let url = format!("{}/messages", base_url(provider_cfg, &self.default_base_url));
        let api_key = api_key_for(provider_cfg, &self.default_api_key_env_var);
        let upstream_request = to_anthropic_request(request);

        let mut builder = self
            .client
            .post(&url)
            .header("anthropic-version", "2023-06-01")
            .json(&upstream_request)
            .timeout(UPSTREAM_DEADLINE);
        if let Some(key) = api_key {
            builder = builder.header("x-api-key", key);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let upstream_body: Value = response.json().await.map_err(|e| GatewayError::Transport(e.to_string()))?;
        let upstream_duration_ms = started.elapsed().as_millis() as u64;

        if status >= 400 {
            let message = upstream_body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("anthropic upstream error")
                .to_string();
            return Err(GatewayError::Provider { status, message });
        }

        let model = request.get("model").and_then(Value::as_str).unwrap_or_default();
        Ok(DispatchResult {
            status,
            body: from_anthropic_response(model, &upstream_body),
            upstream_duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_endpoint_is_annotated_with_the_provider_name() {
        let adapter = AnthropicAdapter::new("https://api.anthropic.com/v1", "ANTHROPIC_API_KEY");
        let req = json!({"model": "claude-3-opus"});
        assert_eq!(adapter.trace_endpoint("/v1/chat/completions", &req), "/v1/messages (Anthropic)");
    }

    #[test]
    fn system_message_is_extracted_from_the_message_list() {
        let req = json!({
            "model": "claude-3-opus",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hi"}
            ]
        });
        let out = to_anthropic_request(&req);
        assert_eq!(out["system"], json!("be terse"));
        assert_eq!(out["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn response_normalizes_content_and_usage() {
        let upstream = json!({
            "id": "msg_1",
            "content": [{"type": "text", "text": "hello"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let out = from_anthropic_response("claude-3-opus", &upstream);
        assert_eq!(out["choices"][0]["message"]["content"], json!("hello"));
        assert_eq!(out["choices"][0]["finish_reason"], json!("stop"));
        assert_eq!(out["usage"]["total_tokens"], json!(15));
    }

    #[test]
    fn max_tokens_stop_reason_maps_to_length() {
        let upstream = json!({
            "content": [{"type": "text", "text": "..."}],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 1, "output_tokens": 1}
        });
        let out = from_anthropic_response("claude-3-opus", &upstream);
        assert_eq!(out["choices"][0]["finish_reason"], json!("length"));
    }
}
