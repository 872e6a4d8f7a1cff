//! HTTP surface of the gateway (C12, §4.1): request lifecycle, session
//! propagation, rate limiting, streaming, health/metrics, graceful shutdown.

pub mod handlers;
pub mod rate_limiter;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod streaming;
pub mod validation;

pub use rate_limiter::RateLimiter;
pub use server::build_router;
pub use state::AppState;
