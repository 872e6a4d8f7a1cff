use std::sync::Arc;
use traceforge_core::error::GatewayError;
use traceforge_core::trace::{Trace, CURRENT_SCHEMA_VERSION};
use traceforge_observability::{redact, RedactConfig};

use crate::circuit_breaker::CircuitBreaker;
use crate::types::StorageBackend;

/// Ties the circuit breaker, redactor, and backend together for the one
/// path every accepted trace goes through (§4.12).
pub struct TraceRecorder {
    backend: Arc<dyn StorageBackend>,
    breaker: Arc<CircuitBreaker>,
    redact_config: RedactConfig,
}

impl TraceRecorder {
    pub fn new(backend: Arc<dyn StorageBackend>, breaker: Arc<CircuitBreaker>, redact_config: RedactConfig) -> Self {
        Self { backend, breaker, redact_config }
    }

    /// Persist `trace`. Never suppresses the client-visible response: the
    /// caller decides what to do with a storage failure (typically: log it
    /// and still return the upstream result to the client).
    pub async fn record(&self, mut trace: Trace) -> Result<(), GatewayError> {
        if self.breaker.is_open() {
            return Err(GatewayError::CircuitOpen);
        }

        if trace.schema_version.is_empty() {
            trace.schema_version = CURRENT_SCHEMA_VERSION.to_string();
        }

        trace.request = redact(&trace.request, &self.redact_config);
        if let Some(response) = &trace.response {
            trace.response = Some(redact(response, &self.redact_config));
        }

        match self.backend.save_trace(&trace).await {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(GatewayError::Storage(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_backend::FileBackend;
    use serde_json::json;
    use tempfile::tempdir;

    fn trace_with_secret() -> Trace {
        Trace::new_success(
            "/v1/chat/completions",
            json!({"model": "gpt-4", "api_key": "sk-super-secret"}),
            json!({"choices": []}),
            5,
            Some("gpt-4".into()),
            None,
        )
    }

    #[tokio::test]
    async fn records_redacted_trace_and_reports_success_to_breaker() {
        let dir = tempdir().unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(FileBackend::new(dir.path()).unwrap());
        let breaker = Arc::new(CircuitBreaker::new());
        let recorder = TraceRecorder::new(backend.clone(), breaker.clone(), RedactConfig::default());

        let trace = trace_with_secret();
        let id = trace.id;
        recorder.record(trace).await.unwrap();

        let stored = backend.get_trace(id).await.unwrap().unwrap();
        assert_eq!(stored.request["api_key"], "[REDACTED]");
        assert_eq!(breaker.metrics().saved_total, 1);
    }

    #[tokio::test]
    async fn refuses_when_circuit_is_open() {
        let dir = tempdir().unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(FileBackend::new(dir.path()).unwrap());
        let breaker = Arc::new(CircuitBreaker::new());
        for _ in 0..10 {
            breaker.record_failure();
        }
        let recorder = TraceRecorder::new(backend, breaker, RedactConfig::default());
        let err = recorder.record(trace_with_secret()).await.unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen));
    }
}
