//! Main binary: loads configuration, wires the storage/VCR/adapter stack,
//! and serves the gateway until a shutdown signal arrives.

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use traceforge_adapters::{Adapter, AnthropicAdapter, GeminiAdapter, OllamaAdapter, OpenAiAdapter};
use traceforge_core::config::{GatewayConfig, ProviderEntry};
use traceforge_core::provider_router::ProviderType;
use traceforge_gateway::state::AppState;
use traceforge_gateway::RateLimiter;
use traceforge_observability::{MetricsCollector, RedactConfig};
use traceforge_store::{
    BackendManager, CircuitBreaker, FileBackend, RetentionManager, RetentionPolicy, SqliteBackend,
    StorageBackend, TraceRecorder,
};
use traceforge_vcr::cassette_store::CassetteStore;
use traceforge_vcr::vcr::VcrMode;
use traceforge_vcr::Vcr;

#[derive(Parser, Debug)]
#[command(name = "traceforge", version, about = "TraceForge — programmable reverse proxy for LLM providers")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "traceforge.yaml")]
    config: PathBuf,

    /// Log level used when RUST_LOG/LOG_LEVEL is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Address to bind the HTTP gateway to
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    traceforge_observability::logger::init(&cli.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "TraceForge starting");

    let config = GatewayConfig::load(&cli.config)?;
    let config = Arc::new(config);

    let breaker = Arc::new(CircuitBreaker::new());

    let backend = build_storage_backend(&config)?;
    let redact_config = RedactConfig {
        extra_fields: config.redact_fields.clone(),
        ..RedactConfig::default()
    };
    let recorder = Arc::new(TraceRecorder::new(backend.clone(), breaker.clone(), redact_config));

    let retention_policy = RetentionPolicy {
        enabled: config.max_trace_retention.enabled,
        check_interval_seconds: config.max_trace_retention.check_interval_seconds,
        max_age: config.max_trace_retention.max_age_days.map(chrono::Duration::days),
        max_count: config.max_trace_retention.max_count,
    };
    let retention_handle = RetentionManager::new(backend.clone(), breaker.clone(), retention_policy).spawn();

    let cassette_store = CassetteStore::new(config.vcr.cassettes_dir.clone());
    let vcr_mode = VcrMode::parse(&config.vcr.mode);
    let vcr = Arc::new(Vcr::new(cassette_store, vcr_mode, config.vcr.signature_secret.clone()));

    let adapters = build_adapters(&config);

    let rate_limiter = Arc::new(RateLimiter::new());
    let metrics = Arc::new(MetricsCollector::new()?);

    let storage_root = PathBuf::from(&config.storage.traces_dir);
    std::fs::create_dir_all(&storage_root).ok();

    let state = AppState {
        config: config.clone(),
        adapters: Arc::new(adapters),
        vcr,
        recorder,
        breaker,
        rate_limiter,
        metrics,
        storage_root,
        started_at: chrono::Utc::now(),
    };

    let addr: SocketAddr = format!("{}:{}", cli.bind, config.proxy_port).parse()?;

    info!(%addr, vcr_mode = ?vcr_mode, "gateway ready");
    traceforge_gateway::server::run(state, addr).await?;

    retention_handle.abort();
    backend.close().await.ok();

    info!("TraceForge stopped");
    Ok(())
}

/// Builds the configured primary backend, wrapping it with a `BackendManager`
/// retry/fallback layer when `storage.fallback` names a second backend
/// (§4.3 "Manager variant").
fn build_storage_backend(config: &GatewayConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    let primary = open_backend(&config.storage.backend, &config.storage.traces_dir, config.storage.tests_dir.as_deref())?;

    if let Some(fallback_kind) = &config.storage.fallback {
        let fallback_dir = format!("{}-fallback", config.storage.traces_dir);
        let fallback = open_backend(fallback_kind, &fallback_dir, None)?;
        let manager = BackendManager::new(primary, vec![fallback]).with_retry_policy(
            config.storage.retry_attempts,
            Duration::from_millis(config.storage.retry_delay_ms),
        );
        return Ok(Arc::new(manager));
    }

    Ok(Arc::from(primary))
}

/// `tests_dir` overrides where tests are stored (§6.5 `TRACEFORGE_TESTS_DIR`);
/// when absent, the file backend falls back to `<dir>/.tests`.
fn open_backend(kind: &str, dir: &str, tests_dir: Option<&str>) -> anyhow::Result<Box<dyn StorageBackend>> {
    match kind {
        "sqlite" => {
            std::fs::create_dir_all(dir).ok();
            let path = PathBuf::from(dir).join("traceforge.db");
            Ok(Box::new(SqliteBackend::new(path)?))
        }
        _ => match tests_dir {
            Some(tests_dir) => Ok(Box::new(FileBackend::with_tests_dir(dir, tests_dir)?)),
            None => Ok(Box::new(FileBackend::new(dir)?)),
        },
    }
}

/// One adapter per known provider type, seeded with sane public defaults
/// (§6.5); a configured `ProviderEntry` overrides `base_url`/`api_key_env_var`
/// per-request, so the defaults here only matter when no entry matches.
fn build_adapters(config: &GatewayConfig) -> HashMap<ProviderType, Arc<dyn Adapter>> {
    let mut adapters: HashMap<ProviderType, Arc<dyn Adapter>> = HashMap::new();

    let openai_default = default_entry(config, ProviderType::OpenAi)
        .map(|e| (e.base_url.clone(), e.api_key_env_var.clone().unwrap_or_else(|| "OPENAI_API_KEY".into())))
        .unwrap_or_else(|| ("https://api.openai.com/v1".to_string(), "OPENAI_API_KEY".to_string()));
    adapters.insert(
        ProviderType::OpenAi,
        Arc::new(OpenAiAdapter::new(openai_default.0, openai_default.1)),
    );

    let anthropic_default = default_entry(config, ProviderType::Anthropic)
        .map(|e| (e.base_url.clone(), e.api_key_env_var.clone().unwrap_or_else(|| "ANTHROPIC_API_KEY".into())))
        .unwrap_or_else(|| ("https://api.anthropic.com/v1".to_string(), "ANTHROPIC_API_KEY".to_string()));
    adapters.insert(
        ProviderType::Anthropic,
        Arc::new(AnthropicAdapter::new(anthropic_default.0, anthropic_default.1)),
    );

    let gemini_default = default_entry(config, ProviderType::Gemini)
        .map(|e| (e.base_url.clone(), e.api_key_env_var.clone().unwrap_or_else(|| "GEMINI_API_KEY".into())))
        .unwrap_or_else(|| {
            (
                "https://generativelanguage.googleapis.com/v1beta".to_string(),
                "GEMINI_API_KEY".to_string(),
            )
        });
    adapters.insert(
        ProviderType::Gemini,
        Arc::new(GeminiAdapter::new(gemini_default.0, gemini_default.1)),
    );

    let ollama_default = default_entry(config, ProviderType::Ollama)
        .map(|e| e.base_url.clone())
        .unwrap_or_else(|| "http://localhost:11434".to_string());
    adapters.insert(ProviderType::Ollama, Arc::new(OllamaAdapter::new(ollama_default)));

    adapters
}

fn default_entry(config: &GatewayConfig, provider_type: ProviderType) -> Option<&ProviderEntry> {
    config
        .providers
        .iter()
        .find(|p| p.enabled && p.default && p.provider_type.eq_ignore_ascii_case(provider_type.as_str()))
        .or_else(|| {
            config
                .providers
                .iter()
                .find(|p| p.enabled && p.provider_type.eq_ignore_ascii_case(provider_type.as_str()))
        })
}
