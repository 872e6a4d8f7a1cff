use serde_json::Value;
use traceforge_core::error::GatewayError;

/// Maximum accepted request body size (§6.1).
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

fn invalid(message: impl Into<String>) -> GatewayError {
    GatewayError::InvalidRequest(message.into())
}

/// Schema-validates a `/v1/chat/completions` body: `model` (string) and
/// `messages` (non-empty array of `{role, content}` objects) are required.
pub fn validate_chat_request(body: &Value) -> Result<(), GatewayError> {
    require_model(body)?;

    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("'messages' must be a non-empty array"))?;
    if messages.is_empty() {
        return Err(invalid("'messages' must be a non-empty array"));
    }
    for (i, message) in messages.iter().enumerate() {
        let obj = message
            .as_object()
            .ok_or_else(|| invalid(format!("messages[{i}] must be an object")))?;
        if !obj.get("role").is_some_and(Value::is_string) {
            return Err(invalid(format!("messages[{i}].role must be a string")));
        }
    }
    Ok(())
}

/// Schema-validates a `/v1/completions` body: `model` (string) and `prompt`
/// (string, or array of strings) are required.
pub fn validate_completions_request(body: &Value) -> Result<(), GatewayError> {
    require_model(body)?;

    match body.get("prompt") {
        Some(Value::String(_)) => Ok(()),
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => Ok(()),
        _ => Err(invalid("'prompt' must be a string or array of strings")),
    }
}

/// Schema-validates a `/v1/embeddings` body: `model` (string) and `input`
/// (string, or array of strings) are required.
pub fn validate_embeddings_request(body: &Value) -> Result<(), GatewayError> {
    require_model(body)?;

    match body.get("input") {
        Some(Value::String(_)) => Ok(()),
        Some(Value::Array(items)) if !items.is_empty() => Ok(()),
        _ => Err(invalid("'input' must be a string or non-empty array")),
    }
}

fn require_model(body: &Value) -> Result<(), GatewayError> {
    if !body.get("model").is_some_and(Value::is_string) {
        return Err(invalid("'model' is required and must be a string"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_well_formed_chat_request() {
        let body = json!({"model": "gpt-4", "messages": [{"role": "user", "content": "hi"}]});
        assert!(validate_chat_request(&body).is_ok());
    }

    #[test]
    fn rejects_chat_request_missing_model() {
        let body = json!({"messages": [{"role": "user", "content": "hi"}]});
        assert!(validate_chat_request(&body).is_err());
    }

    #[test]
    fn rejects_chat_request_with_empty_messages() {
        let body = json!({"model": "gpt-4", "messages": []});
        assert!(validate_chat_request(&body).is_err());
    }

    #[test]
    fn rejects_message_missing_role() {
        let body = json!({"model": "gpt-4", "messages": [{"content": "hi"}]});
        assert!(validate_chat_request(&body).is_err());
    }

    #[test]
    fn accepts_completions_request_with_array_prompt() {
        let body = json!({"model": "gpt-4", "prompt": ["a", "b"]});
        assert!(validate_completions_request(&body).is_ok());
    }

    #[test]
    fn rejects_completions_request_with_non_string_prompt_items() {
        let body = json!({"model": "gpt-4", "prompt": [1, 2]});
        assert!(validate_completions_request(&body).is_err());
    }

    #[test]
    fn accepts_embeddings_request_with_string_input() {
        let body = json!({"model": "text-embedding-3-small", "input": "hello"});
        assert!(validate_embeddings_request(&body).is_ok());
    }

    #[test]
    fn rejects_embeddings_request_with_empty_input_array() {
        let body = json!({"model": "text-embedding-3-small", "input": []});
        assert!(validate_embeddings_request(&body).is_err());
    }
}
