use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::shutdown::shutdown_signal;
use crate::state::AppState;
use crate::validation::MAX_BODY_BYTES;

/// Builds the gateway's `axum` router (§4.1): the four LLM-facing routes
/// plus `/health` and `/metrics`, a 1 MiB body cap, and request tracing —
/// mirroring the teacher's `AdminServer::build_router` layering.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(handlers::chat::chat_completions))
        .route("/v1/completions", post(handlers::completions::completions))
        .route("/v1/embeddings", post(handlers::embeddings::embeddings))
        .route("/health", get(handlers::health::health))
        .route("/metrics", get(handlers::metrics::metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `addr` and serves until a SIGINT/SIGTERM graceful-shutdown signal
/// fires (§4.1 "Shutdown"). The caller is responsible for closing storage
/// backends and stopping background tasks after this returns.
pub async fn run(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "gateway listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
