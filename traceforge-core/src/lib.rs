//! Domain model, configuration, error taxonomy, request fingerprinting, and
//! provider-routing logic shared by every TraceForge crate.

pub mod cassette;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod provider_router;
pub mod session;
pub mod trace;

pub use cassette::{Cassette, CassetteResponse};
pub use config::GatewayConfig;
pub use error::{ErrorType, GatewayError};
pub use fingerprint::{fingerprint, FingerprintInput, MatchMode};
pub use provider_router::{select_provider, ProviderType, SelectedProvider};
pub use session::SessionContext;
pub use trace::{Test, Trace, TraceMetadata, TraceStatus};
