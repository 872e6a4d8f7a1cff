use axum::extract::State;

use crate::state::AppState;

/// Prometheus text-exposition endpoint (§6.3), mirroring the teacher's
/// `/metrics` handler. Circuit breaker gauges, and `saved_total`/
/// `failed_total`, are sourced from the breaker on every scrape — it's the
/// write path's source of truth, not a separately-counted duplicate — so
/// the exposed numbers always reflect real saves/failures.
pub async fn metrics(State(state): State<AppState>) -> String {
    let breaker_metrics = state.breaker.metrics();
    state.metrics.set_circuit_state(breaker_metrics.consecutive_failures, breaker_metrics.circuit_open);
    state.metrics.render(breaker_metrics.saved_total, breaker_metrics.failed_total)
}
