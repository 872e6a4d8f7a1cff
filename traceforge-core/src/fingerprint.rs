use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Elides sampling parameters so cosmetic changes to temperature etc.
    /// still replay against the same cassette.
    Fuzzy,
    /// Commits to sampling parameters; any change misses the cassette.
    Exact,
}

/// Canonicalized request content that participates in a fingerprint.
/// `messages_or_prompt` and `tools` are passed through `serde_json::to_string`
/// after key-sorting so that field order in the inbound JSON never affects
/// the digest.
pub struct FingerprintInput<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub messages_or_prompt: &'a Value,
    pub tools: Option<&'a Value>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub stop: Option<&'a Value>,
}

/// Sort object keys recursively so two structurally-equal JSON values with
/// differently ordered keys hash identically.
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

fn canonical_string(value: &Value) -> String {
    serde_json::to_string(&canonicalize(value)).unwrap_or_default()
}

/// Pure, deterministic SHA-256 digest of a request under the given match
/// mode. `fingerprint(r, m) == fingerprint(r, m)` for any `r`, always —
/// no clock, randomness, or external state is consulted.
pub fn fingerprint(input: &FingerprintInput<'_>, mode: MatchMode) -> String {
    let mut parts = Vec::new();

    parts.push(format!("provider={}", input.provider));
    parts.push(format!("model={}", input.model));
    parts.push(format!(
        "messages={}",
        canonical_string(input.messages_or_prompt)
    ));
    parts.push(format!(
        "tools={}",
        input.tools.map(canonical_string).unwrap_or_default()
    ));

    if mode == MatchMode::Exact {
        parts.push(format!("temperature={:?}", input.temperature));
        parts.push(format!("max_tokens={:?}", input.max_tokens));
        parts.push(format!("top_p={:?}", input.top_p));
        parts.push(format!("frequency_penalty={:?}", input.frequency_penalty));
        parts.push(format!("presence_penalty={:?}", input.presence_penalty));
        parts.push(format!(
            "stop={}",
            input.stop.map(canonical_string).unwrap_or_default()
        ));
    }

    let raw = parts.join("\n");
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_input<'a>(messages: &'a Value) -> FingerprintInput<'a> {
        FingerprintInput {
            provider: "openai",
            model: "gpt-4",
            messages_or_prompt: messages,
            tools: None,
            temperature: Some(0.7),
            max_tokens: Some(256),
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
        }
    }

    #[test]
    fn fingerprint_is_pure() {
        let messages = json!([{"role": "user", "content": "Hi"}]);
        let input = base_input(&messages);
        assert_eq!(
            fingerprint(&input, MatchMode::Fuzzy),
            fingerprint(&input, MatchMode::Fuzzy)
        );
    }

    #[test]
    fn fuzzy_mode_ignores_sampling_params() {
        let messages = json!([{"role": "user", "content": "Hi"}]);
        let mut a = base_input(&messages);
        let mut b = base_input(&messages);
        a.temperature = Some(0.1);
        b.temperature = Some(0.9);
        assert_eq!(
            fingerprint(&a, MatchMode::Fuzzy),
            fingerprint(&b, MatchMode::Fuzzy)
        );
    }

    #[test]
    fn exact_mode_is_sensitive_to_sampling_params() {
        let messages = json!([{"role": "user", "content": "Hi"}]);
        let mut a = base_input(&messages);
        let mut b = base_input(&messages);
        a.temperature = Some(0.1);
        b.temperature = Some(0.9);
        assert_ne!(
            fingerprint(&a, MatchMode::Exact),
            fingerprint(&b, MatchMode::Exact)
        );
    }

    #[test]
    fn key_order_does_not_affect_fingerprint() {
        let m1 = json!([{"role": "user", "content": "Hi"}]);
        let m2 = json!([{"content": "Hi", "role": "user"}]);
        let a = base_input(&m1);
        let b = base_input(&m2);
        assert_eq!(
            fingerprint(&a, MatchMode::Fuzzy),
            fingerprint(&b, MatchMode::Fuzzy)
        );
    }

    #[test]
    fn different_messages_produce_different_fingerprints() {
        let m1 = json!([{"role": "user", "content": "Hi"}]);
        let m2 = json!([{"role": "user", "content": "Bye"}]);
        let a = base_input(&m1);
        let b = base_input(&m2);
        assert_ne!(
            fingerprint(&a, MatchMode::Fuzzy),
            fingerprint(&b, MatchMode::Fuzzy)
        );
    }

    #[test]
    fn fingerprint_is_64_hex_chars() {
        let messages = json!([{"role": "user", "content": "Hi"}]);
        let input = base_input(&messages);
        let fp = fingerprint(&input, MatchMode::Fuzzy);
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
