pub mod logger;
pub mod metrics;
pub mod redact;
pub mod redaction_audit;

pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use redact::{redact, redact_header, RedactConfig};
pub use redaction_audit::{diff_audit_entries, RedactionAuditEntry, RedactionType};
