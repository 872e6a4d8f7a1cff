//! Structured logging setup, mirroring the teacher's
//! `tracing_subscriber::fmt()` initialization in its server binary.

/// Initialize the global tracing subscriber. `default_level` is used when
/// `RUST_LOG`/`LOG_LEVEL` is unset. Call once, at process startup.
pub fn init(default_level: &str) {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| default_level.to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .json()
        .init();
}
