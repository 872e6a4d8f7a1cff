use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Instant;
use traceforge_core::config::ProviderEntry;
use traceforge_core::error::GatewayError;
use traceforge_core::session::SessionContext;

use crate::adapter::{api_key_for, base_url, Adapter, DispatchResult, UPSTREAM_DEADLINE};
use crate::providers::openai::map_reqwest_error;

/// Maps the client's OpenAI-shaped chat request onto Google's
/// `generateContent` endpoint, and normalizes the response back to the
/// OpenAI shape (§4.9). Gemini addresses the API key as a query parameter
/// rather than a bearer/header credential.
pub struct GeminiAdapter {
    client: reqwest::Client,
    default_base_url: String,
    default_api_key_env_var: String,
}

impl GeminiAdapter {
    pub fn new(default_base_url: impl Into<String>, default_api_key_env_var: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_base_url: default_base_url.into(),
            default_api_key_env_var: default_api_key_env_var.into(),
        }
    }
}

/// Gemini uses "model" rather than "assistant" for the model's own turns,
/// and carries the system prompt as a separate top-level `systemInstruction`
/// rather than a message with `role: system`.
fn to_gemini_request(request: &Value) -> Value {
    let mut system = String::new();
    let mut contents = Vec::new();
    if let Some(arr) = request.get("messages").and_then(Value::as_array) {
        for msg in arr {
            let role = msg.get("role").and_then(Value::as_str).unwrap_or("user");
            let text = msg.get("content").and_then(Value::as_str).unwrap_or("");
            if role == "system" {
                if !system.is_empty() {
                    system.push('\n');
                }
                system.push_str(text);
                continue;
            }
            let gemini_role = if role == "assistant" { "model" } else { "user" };
            contents.push(json!({
                "role": gemini_role,
                "parts": [{"text": text}],
            }));
        }
    }

    let mut generation_config = serde_json::Map::new();
    if let Some(t) = request.get("temperature") {
        generation_config.insert("temperature".to_string(), t.clone());
    }
    if let Some(mt) = request.get("max_tokens") {
        generation_config.insert("maxOutputTokens".to_string(), mt.clone());
    }
    if let Some(tp) = request.get("top_p") {
        generation_config.insert("topP".to_string(), tp.clone());
    }

    let mut body = json!({ "contents": contents });
    if !generation_config.is_empty() {
        body["generationConfig"] = Value::Object(generation_config);
    }
    if !system.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{"text": system}] });
    }
    body
}

fn finish_reason_from_gemini(reason: Option<&str>) -> &'static str {
    match reason {
        Some("STOP") => "stop",
        Some("MAX_TOKENS") => "length",
        Some("SAFETY") | Some("RECITATION") => "content_filter",
        _ => "stop",
    }
}

fn from_gemini_response(model: &str, response: &Value) -> Value {
    let candidate = response.pointer("/candidates/0");
    let text = candidate
        .and_then(|c| c.pointer("/content/parts/0/text"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let finish_reason = candidate.and_then(|c| c.get("finishReason")).and_then(Value::as_str);

    let prompt_tokens = response.pointer("/usageMetadata/promptTokenCount").and_then(Value::as_u64).unwrap_or(0);
    let completion_tokens = response
        .pointer("/usageMetadata/candidatesTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let total_tokens = response
        .pointer("/usageMetadata/totalTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(prompt_tokens + completion_tokens);

    json!({
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": finish_reason_from_gemini(finish_reason),
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": total_tokens,
        }
    })
}

#[async_trait]
impl Adapter for GeminiAdapter {
    /// Normalized to Google's native `generateContent` endpoint (§3).
    fn trace_endpoint(&self, _inbound_endpoint: &str, request: &Value) -> String {
        let model = request.get("model").and_then(Value::as_str).unwrap_or("unknown");
        format!("/models/{model}:generateContent (Gemini)")
    }

    async fn dispatch(
        &self,
        _endpoint: &str,
        request: &Value,
        provider_cfg: Option<&ProviderEntry>,
        _session_ctx: &SessionContext,
    ) -> Result<DispatchResult, GatewayError> {
        let model = request.get("model").and_then(Value::as_str).unwrap_or_default();
        let api_key = api_key_for(provider_cfg, &self.default_api_key_env_var);
        let mut url = format!(
            "{}/models/{model}:generateContent",
            base_url(provider_cfg, &self.default_base_url)
        );
        if let Some(key) = &api_key {
            url = format!("{url}?key={key}");
        }

        let upstream_request = to_gemini_request(request);
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
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("gemini upstream error")
                .to_string();
            return Err(GatewayError::Provider { status, message });
        }

        Ok(DispatchResult {
            status,
            body: from_gemini_response(model, &upstream_body),
            upstream_duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_endpoint_names_the_generate_content_path_and_model() {
        let adapter = GeminiAdapter::new("https://generativelanguage.googleapis.com/v1", "GEMINI_API_KEY");
        let req = json!({"model": "gemini-1.5-pro"});
        assert_eq!(
            adapter.trace_endpoint("/v1/chat/completions", &req),
            "/models/gemini-1.5-pro:generateContent (Gemini)"
        );
    }

    #[test]
    fn system_message_becomes_system_instruction() {
        let req = json!({
            "model": "gemini-1.5-pro",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hi"}
            ]
        });
        let out = to_gemini_request(&req);
        assert_eq!(out["systemInstruction"]["parts"][0]["text"], json!("be terse"));
        assert_eq!(out["contents"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let req = json!({
            "model": "gemini-1.5-pro",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ]
        });
        let out = to_gemini_request(&req);
        assert_eq!(out["contents"][1]["role"], json!("model"));
    }

    #[test]
    fn response_normalizes_candidate_text_and_usage() {
        let upstream = json!({
            "candidates": [{
                "content": {"parts": [{"text": "hello there"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6}
        });
        let out = from_gemini_response("gemini-1.5-pro", &upstream);
        assert_eq!(out["choices"][0]["message"]["content"], json!("hello there"));
        assert_eq!(out["choices"][0]["finish_reason"], json!("stop"));
        assert_eq!(out["usage"]["total_tokens"], json!(6));
    }

    #[test]
    fn max_tokens_finish_reason_maps_to_length() {
        let upstream = json!({
            "candidates": [{"content": {"parts": [{"text": "..."}]}, "finishReason": "MAX_TOKENS"}],
            "usageMetadata": {"promptTokenCount": 1, "candidatesTokenCount": 1, "totalTokenCount": 2}
        });
        let out = from_gemini_response("gemini-1.5-pro", &upstream);
        assert_eq!(out["choices"][0]["finish_reason"], json!("length"));
    }
}
