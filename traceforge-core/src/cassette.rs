use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CASSETTE_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CassetteResponse {
    pub status: u16,
    pub headers: std::collections::BTreeMap<String, String>,
    pub body: Value,
}

/// The durable unit of record/replay, addressed by a request fingerprint.
///
/// Field order here matches the canonical JSON ordering used for signing —
/// see `traceforge_vcr::signing::canonical_json`. Do not reorder fields
/// without updating the signer, or existing signatures stop verifying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cassette {
    pub cassette_version: String,
    pub provider: String,
    pub request: Value,
    pub response: CassetteResponse,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Cassette {
    pub fn new(provider: impl Into<String>, request: Value, response: CassetteResponse) -> Self {
        Self {
            cassette_version: CASSETTE_VERSION.to_string(),
            provider: provider.into(),
            request,
            response,
            recorded_at: chrono::Utc::now(),
            signature: None,
        }
    }

    /// `true` iff the stored version string is present and non-empty, per
    /// the Cassette Store's `find` contract.
    pub fn has_valid_version(&self) -> bool {
        !self.cassette_version.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_cassette_has_no_signature_until_signed() {
        let c = Cassette::new(
            "openai",
            json!({"model": "gpt-4"}),
            CassetteResponse {
                status: 200,
                headers: Default::default(),
                body: json!({"choices": []}),
            },
        );
        assert!(c.signature.is_none());
        assert!(c.has_valid_version());
    }
}
