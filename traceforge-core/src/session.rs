use serde_json::Value;
use uuid::Uuid;

/// Inbound session-propagation headers (§4.6).
pub const HDR_SESSION_ID: &str = "x-traceforge-session-id";
pub const HDR_STEP_INDEX: &str = "x-traceforge-step-index";
pub const HDR_PARENT_TRACE_ID: &str = "x-traceforge-parent-trace-id";
pub const HDR_STEP_ID: &str = "x-traceforge-step-id";
pub const HDR_PARENT_STEP_ID: &str = "x-traceforge-parent-step-id";
pub const HDR_ORGANIZATION_ID: &str = "x-traceforge-organization-id";
pub const HDR_SERVICE_ID: &str = "x-traceforge-service-id";
pub const HDR_STATE: &str = "x-traceforge-state";

/// Outbound response headers (§6.1), echoed on every response.
pub const HDR_RESP_SESSION_ID: &str = "X-TraceForge-Session-ID";
pub const HDR_RESP_TRACE_ID: &str = "X-TraceForge-Trace-ID";
pub const HDR_RESP_NEXT_STEP: &str = "X-TraceForge-Next-Step";

/// Session/DAG/tenancy context parsed from inbound headers. Ownership is
/// implicit: clients mint `session_id`; the proxy never reuses one it has
/// not received, and mints a fresh one when absent.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub session_id: String,
    pub step_index: u32,
    pub parent_trace_id: Option<Uuid>,
    pub step_id: Option<String>,
    pub parent_step_id: Option<String>,
    pub organization_id: Option<String>,
    pub service_id: Option<String>,
    pub state_snapshot: Option<Value>,
}

impl SessionContext {
    /// Parse headers (already lower-cased names -> values) into a session
    /// context. A missing `session_id` mints a fresh UUID v4. A malformed
    /// `X-TraceForge-State` is logged and dropped, never fatal.
    pub fn from_headers(headers: &std::collections::HashMap<String, String>) -> Self {
        let session_id = headers
            .get(HDR_SESSION_ID)
            .cloned()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let step_index = headers
            .get(HDR_STEP_INDEX)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);

        let parent_trace_id = headers
            .get(HDR_PARENT_TRACE_ID)
            .and_then(|v| Uuid::parse_str(v).ok());

        let state_snapshot = headers.get(HDR_STATE).and_then(|raw| {
            match serde_json::from_str::<Value>(raw) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed X-TraceForge-State header");
                    None
                }
            }
        });

        Self {
            session_id,
            step_index,
            parent_trace_id,
            step_id: headers.get(HDR_STEP_ID).cloned(),
            parent_step_id: headers.get(HDR_PARENT_STEP_ID).cloned(),
            organization_id: headers.get(HDR_ORGANIZATION_ID).cloned(),
            service_id: headers.get(HDR_SERVICE_ID).cloned(),
            state_snapshot,
        }
    }

    /// Value for the `X-TraceForge-Next-Step` response header.
    pub fn next_step(&self) -> u32 {
        self.step_index + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn mints_fresh_session_id_when_absent() {
        let ctx = SessionContext::from_headers(&HashMap::new());
        assert!(!ctx.session_id.is_empty());
        assert_eq!(ctx.step_index, 0);
        assert_eq!(ctx.next_step(), 1);
    }

    #[test]
    fn parses_supplied_session_headers() {
        let mut h = HashMap::new();
        h.insert(HDR_SESSION_ID.to_string(), "sess-1".to_string());
        h.insert(HDR_STEP_INDEX.to_string(), "4".to_string());
        let ctx = SessionContext::from_headers(&h);
        assert_eq!(ctx.session_id, "sess-1");
        assert_eq!(ctx.step_index, 4);
        assert_eq!(ctx.next_step(), 5);
    }

    #[test]
    fn malformed_state_header_is_dropped_not_fatal() {
        let mut h = HashMap::new();
        h.insert(HDR_STATE.to_string(), "{not json".to_string());
        let ctx = SessionContext::from_headers(&h);
        assert!(ctx.state_snapshot.is_none());
    }

    #[test]
    fn well_formed_state_header_is_parsed() {
        let mut h = HashMap::new();
        h.insert(HDR_STATE.to_string(), r#"{"k":"v"}"#.to_string());
        let ctx = SessionContext::from_headers(&h);
        assert_eq!(ctx.state_snapshot, Some(serde_json::json!({"k": "v"})));
    }
}
