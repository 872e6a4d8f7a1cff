/// Resolves when SIGINT or SIGTERM is received, for
/// `axum::serve(..).with_graceful_shutdown(shutdown_signal())` (§4.1
/// "Shutdown"). Mirrors the teacher's SIGTERM/SIGINT handling, adapted from
/// `libc::signal` to `tokio::signal` since the gateway runs on tokio rather
/// than spawning a dedicated OS thread for its HTTP surface.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}
