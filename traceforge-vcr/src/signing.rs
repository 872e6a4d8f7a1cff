use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use traceforge_core::cassette::Cassette;

type HmacSha256 = Hmac<Sha256>;

/// Recursively sort object keys so the signed digest never depends on
/// field insertion order — mirrors `traceforge_core::fingerprint`'s
/// canonicalization, applied here to whole cassette records instead of
/// request fragments.
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

/// Canonical JSON of every cassette field except `signature`, per the
/// field-order contract documented on `Cassette` itself.
pub fn canonical_json(cassette: &Cassette) -> serde_json::Result<String> {
    let mut value = serde_json::to_value(cassette)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("signature");
    }
    Ok(serde_json::to_string(&canonicalize(&value)).unwrap_or_default())
}

/// HMAC-SHA-256 over the canonical JSON, hex-encoded.
pub fn sign(cassette: &Cassette, secret: &str) -> serde_json::Result<String> {
    let canonical = canonical_json(cassette)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any size");
    mac.update(canonical.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// `true` iff `cassette.signature` verifies against `secret`. A missing
/// signature is not a verification failure here — callers decide whether
/// to accept unsigned cassettes (§4.7 backward-compatibility clause).
pub fn verify(cassette: &Cassette, secret: &str) -> serde_json::Result<bool> {
    let Some(signature) = &cassette.signature else {
        return Ok(false);
    };
    let expected = sign(cassette, secret)?;
    Ok(constant_time_eq(signature.as_bytes(), expected.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use traceforge_core::cassette::CassetteResponse;

    fn sample() -> Cassette {
        Cassette::new(
            "openai",
            json!({"model": "gpt-4"}),
            CassetteResponse {
                status: 200,
                headers: Default::default(),
                body: json!({"choices": []}),
            },
        )
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let mut c = sample();
        c.signature = Some(sign(&c, "secret").unwrap());
        assert!(verify(&c, "secret").unwrap());
    }

    #[test]
    fn tampering_with_the_body_breaks_verification() {
        let mut c = sample();
        c.signature = Some(sign(&c, "secret").unwrap());
        c.response.status = 500;
        assert!(!verify(&c, "secret").unwrap());
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let mut c = sample();
        c.signature = Some(sign(&c, "secret-a").unwrap());
        assert!(!verify(&c, "secret-b").unwrap());
    }

    #[test]
    fn missing_signature_does_not_verify() {
        let c = sample();
        assert!(!verify(&c, "secret").unwrap());
    }

    #[test]
    fn canonical_json_is_independent_of_field_order_in_requests() {
        let mut a = sample();
        a.request = json!({"b": 1, "a": 2});
        let mut b = sample();
        b.request = json!({"a": 2, "b": 1});
        b.recorded_at = a.recorded_at;
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }
}
