use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Current trace schema version. Bumped whenever a breaking shape change is
/// introduced; `migrate::upgrade` knows how to bring older traces forward.
pub const CURRENT_SCHEMA_VERSION: &str = "1.1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceMetadata {
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub status: TraceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time to the first forwarded chunk of a streamed response (§4.1).
    /// `None` for non-streamed traces.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_chunk_latency_ms: Option<u64>,
}

/// The canonical, redacted record of one request/response pair.
///
/// Invariants (enforced by constructors, not re-validated on every getter):
/// - exactly one trace per accepted upstream call
/// - `response` is `None` iff `metadata.status == Error`
/// - `step_index >= 0` (encoded as `u32`, so structurally guaranteed)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: Uuid,
    pub schema_version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub endpoint: String,
    pub request: Value,
    pub response: Option<Value>,
    pub metadata: TraceMetadata,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_trace_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_snapshot: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_step_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
}

impl Trace {
    pub fn new_success(
        endpoint: impl Into<String>,
        request: Value,
        response: Value,
        duration_ms: u64,
        model: Option<String>,
        tokens_used: Option<u64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            timestamp: chrono::Utc::now(),
            endpoint: endpoint.into(),
            request,
            response: Some(response),
            metadata: TraceMetadata {
                duration_ms,
                tokens_used,
                model,
                status: TraceStatus::Success,
                error: None,
                first_chunk_latency_ms: None,
            },
            session_id: None,
            step_index: None,
            parent_trace_id: None,
            state_snapshot: None,
            step_id: None,
            parent_step_id: None,
            organization_id: None,
            service_id: None,
        }
    }

    pub fn new_error(
        endpoint: impl Into<String>,
        request: Value,
        duration_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            timestamp: chrono::Utc::now(),
            endpoint: endpoint.into(),
            request,
            response: None,
            metadata: TraceMetadata {
                duration_ms,
                tokens_used: None,
                model: None,
                status: TraceStatus::Error,
                error: Some(error.into()),
                first_chunk_latency_ms: None,
            },
            session_id: None,
            step_index: None,
            parent_trace_id: None,
            state_snapshot: None,
            step_id: None,
            parent_step_id: None,
            organization_id: None,
            service_id: None,
        }
    }

    pub fn with_first_chunk_latency_ms(mut self, v: Option<u64>) -> Self {
        self.metadata.first_chunk_latency_ms = v;
        self
    }

    /// Structural invariant check, used by tests and by the storage layer
    /// before a write is accepted.
    pub fn is_well_formed(&self) -> bool {
        match self.metadata.status {
            TraceStatus::Success => self.response.is_some(),
            TraceStatus::Error => self.response.is_none(),
        }
    }
}

/// A declarative check persisted (but not interpreted) by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Test {
    pub id: Uuid,
    pub name: String,
    pub request: Value,
    pub assertions: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixtures: Option<Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub policy_refs: Vec<String>,
}

pub mod migrate {
    use super::*;

    /// Best-effort upgrade of a stored trace JSON document to the current
    /// schema. Only a hard parse failure should abort a load; missing
    /// fields are defaulted and reported back as warnings.
    pub fn upgrade(mut raw: Value) -> (Value, Vec<String>) {
        let mut warnings = Vec::new();
        let Some(obj) = raw.as_object_mut() else {
            return (raw, warnings);
        };

        let version = obj
            .get("schema_version")
            .and_then(Value::as_str)
            .unwrap_or("0.0.0")
            .to_string();

        if version != CURRENT_SCHEMA_VERSION {
            warnings.push(format!(
                "upgrading trace from schema {version} to {CURRENT_SCHEMA_VERSION}"
            ));
            obj.insert(
                "schema_version".to_string(),
                Value::String(CURRENT_SCHEMA_VERSION.to_string()),
            );
        }

        if !obj.contains_key("metadata") {
            warnings.push("missing metadata block, defaulting".to_string());
            obj.insert(
                "metadata".to_string(),
                serde_json::json!({
                    "duration_ms": 0,
                    "status": "error",
                    "error": "migrated record had no metadata"
                }),
            );
        }

        (raw, warnings)
    }
}
