use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// Composite liveness/readiness probe (§4.1): traces-directory write
/// access, circuit-breaker state. `error` (write probe failed) maps to
/// HTTP 503; `degraded` (circuit open, but still reachable) and `ok` both
/// return 200 so load balancers don't yank a gateway that's merely
/// throttled on storage.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let writable = probe_write_access(&state.storage_root);
    let circuit_open = state.breaker.is_open();

    let status = if !writable {
        "error"
    } else if circuit_open {
        "degraded"
    } else {
        "ok"
    };

    let body = json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {
            "traces_dir_writable": writable,
            "circuit_open": circuit_open,
        },
        "uptime_seconds": (chrono::Utc::now() - state.started_at).num_seconds().max(0),
    });

    let http_status = if status == "error" { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
    (http_status, Json(body))
}

fn probe_write_access(root: &std::path::Path) -> bool {
    let probe = root.join(".health_check");
    if std::fs::write(&probe, b"ok").is_err() {
        return false;
    }
    let _ = std::fs::remove_file(&probe);
    true
}
