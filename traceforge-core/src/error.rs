use serde::Serialize;
use thiserror::Error;

/// Machine-readable error type, stable across releases. Kept separate from
/// the human-readable message so CI tooling can match on `type` without
/// parsing prose (see the original strict-mode note in the design notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequestError,
    RateLimitError,
    AnthropicError,
    GeminiError,
    OllamaError,
    ProviderError,
    StorageError,
    VcrMiss,
    StrictMiss,
    StrictRecordForbidden,
    CassetteTamper,
    CircuitOpen,
    Timeout,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::InvalidRequestError => "invalid_request_error",
            ErrorType::RateLimitError => "rate_limit_error",
            ErrorType::AnthropicError => "anthropic_error",
            ErrorType::GeminiError => "gemini_error",
            ErrorType::OllamaError => "ollama_error",
            ErrorType::ProviderError => "provider_error",
            ErrorType::StorageError => "storage_error",
            ErrorType::VcrMiss => "vcr_miss",
            ErrorType::StrictMiss => "strict_miss",
            ErrorType::StrictRecordForbidden => "strict_record_forbidden",
            ErrorType::CassetteTamper => "cassette_tamper",
            ErrorType::CircuitOpen => "circuit_open",
            ErrorType::Timeout => "timeout",
        }
    }
}

/// Unified error type for the gateway core.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("upstream transport failure: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("circuit open: storage writes suspended")]
    CircuitOpen,

    #[error("VCR replay miss for fingerprint {fingerprint}")]
    VcrMiss { fingerprint: String },

    #[error("strict mode: cassette missing for fingerprint {fingerprint}")]
    StrictMiss { fingerprint: String },

    #[error("strict mode: recording is disallowed")]
    StrictRecordForbidden,

    #[error("cassette signature mismatch: tamper detected for fingerprint {fingerprint}")]
    CassetteTamper { fingerprint: String },

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl GatewayError {
    /// Map to HTTP status code per §6.1 / §7.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::InvalidRequest(_) => 400,
            GatewayError::RateLimited => 429,
            GatewayError::Provider { status, .. } => *status,
            GatewayError::Transport(_) => 502,
            GatewayError::Storage(_) => 500,
            GatewayError::CircuitOpen => 500,
            GatewayError::VcrMiss { .. } => 500,
            GatewayError::StrictMiss { .. } => 500,
            GatewayError::StrictRecordForbidden => 500,
            GatewayError::CassetteTamper { .. } => 500,
            GatewayError::Timeout(_) => 504,
            GatewayError::Config(_) => 500,
            GatewayError::Io(_) => 500,
            GatewayError::Serde(_) => 500,
        }
    }

    /// Stable, machine-readable error-type tag (§6.1's `type` field).
    pub fn error_type(&self) -> ErrorType {
        match self {
            GatewayError::InvalidRequest(_) => ErrorType::InvalidRequestError,
            GatewayError::RateLimited => ErrorType::RateLimitError,
            GatewayError::Provider { .. } => ErrorType::ProviderError,
            GatewayError::Transport(_) => ErrorType::ProviderError,
            GatewayError::Storage(_) => ErrorType::StorageError,
            GatewayError::CircuitOpen => ErrorType::CircuitOpen,
            GatewayError::VcrMiss { .. } => ErrorType::VcrMiss,
            GatewayError::StrictMiss { .. } => ErrorType::StrictMiss,
            GatewayError::StrictRecordForbidden => ErrorType::StrictRecordForbidden,
            GatewayError::CassetteTamper { .. } => ErrorType::CassetteTamper,
            GatewayError::Timeout(_) => ErrorType::Timeout,
            GatewayError::Config(_) => ErrorType::StorageError,
            GatewayError::Io(_) => ErrorType::StorageError,
            GatewayError::Serde(_) => ErrorType::InvalidRequestError,
        }
    }

    /// JSON error body per §6.1: `{error:{message, type, details?}}`.
    /// Never leaks secrets, stack traces, or internal paths.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                message: self.client_message(),
                error_type: self.error_type().as_str(),
                details: None,
            },
        }
    }

    /// Sanitized client-facing message. Internal variants (`Io`, `Config`)
    /// are flattened to a generic message so local paths never leak.
    fn client_message(&self) -> String {
        match self {
            GatewayError::Io(_) | GatewayError::Config(_) => {
                "internal storage error".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
