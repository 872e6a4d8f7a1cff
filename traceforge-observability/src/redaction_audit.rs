//! Redaction-audit side table record (§4.3 indexed backend).
//!
//! Every field redacted from a persisted trace gets one row here, so an
//! operator can answer "what was masked, and when" without ever being able
//! to recover the original value — only a hash of the masked value is kept.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionAuditEntry {
    pub trace_id: uuid::Uuid,
    pub field_path: String,
    pub hash_of_masked_value: String,
    pub redaction_type: RedactionType,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub reversible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionType {
    FieldName,
    Header,
    Pattern,
}

impl RedactionAuditEntry {
    pub fn new(
        trace_id: uuid::Uuid,
        field_path: impl Into<String>,
        masked_value: &str,
        redaction_type: RedactionType,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(masked_value.as_bytes());
        Self {
            trace_id,
            field_path: field_path.into(),
            hash_of_masked_value: hex::encode(hasher.finalize()),
            redaction_type,
            timestamp: chrono::Utc::now(),
            user: None,
            reversible: false,
        }
    }
}

/// Walk a redacted value tree, diffing it against the pre-redaction value,
/// and emit one audit entry per field that changed. `path` accumulates
/// dotted JSON-pointer-like segments (`request.messages.0.content`).
pub fn diff_audit_entries(
    trace_id: uuid::Uuid,
    before: &serde_json::Value,
    after: &serde_json::Value,
    path: &str,
    out: &mut Vec<RedactionAuditEntry>,
) {
    use serde_json::Value;
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            for (k, av) in a {
                let child_path = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{path}.{k}")
                };
                if let Some(bv) = b.get(k) {
                    diff_audit_entries(trace_id, bv, av, &child_path, out);
                }
            }
        }
        (Value::Array(b), Value::Array(a)) => {
            for (i, (bv, av)) in b.iter().zip(a.iter()).enumerate() {
                let child_path = format!("{path}.{i}");
                diff_audit_entries(trace_id, bv, av, &child_path, out);
            }
        }
        (b, a) if b != a => {
            let masked = a.as_str().unwrap_or("[REDACTED]");
            let kind = if masked.contains("[REDACTED]") && path.contains("header") {
                RedactionType::Header
            } else {
                RedactionType::FieldName
            };
            out.push(RedactionAuditEntry::new(trace_id, path, masked, kind));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_detects_redacted_leaf() {
        let before = json!({"api_key": "sk-real-secret", "model": "gpt-4"});
        let after = json!({"api_key": "[REDACTED]", "model": "gpt-4"});
        let mut entries = Vec::new();
        diff_audit_entries(uuid::Uuid::new_v4(), &before, &after, "", &mut entries);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field_path, "api_key");
        assert!(!entries[0].reversible);
    }

    #[test]
    fn diff_on_identical_trees_is_empty() {
        let v = json!({"model": "gpt-4"});
        let mut entries = Vec::new();
        diff_audit_entries(uuid::Uuid::new_v4(), &v, &v, "", &mut entries);
        assert!(entries.is_empty());
    }

    #[test]
    fn hash_never_recovers_original_value() {
        let entry = RedactionAuditEntry::new(
            uuid::Uuid::new_v4(),
            "request.api_key",
            "[REDACTED]",
            RedactionType::FieldName,
        );
        assert_ne!(entry.hash_of_masked_value, "[REDACTED]");
        assert_eq!(entry.hash_of_masked_value.len(), 64);
    }
}
