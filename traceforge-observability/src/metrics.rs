use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process/component metrics for the gateway (§6.3).
///
/// Counters mirror the teacher's `MetricsCollector` naming scheme
/// (`ando_*` -> `traceforge_*`), registered once against a private
/// `Registry` so multiple gateway instances in a test process don't clash
/// on prometheus's default global registry.
///
/// `traces_saved_total`/`traces_failed_total` are deliberately not tracked
/// as independent Prometheus counters here — the `CircuitBreaker` (§4.4) is
/// the single source of truth for those (it's on the write path, this
/// collector isn't), so `render` takes them as arguments rather than
/// re-counting them and risking the two diverging.
pub struct MetricsCollector {
    registry: Registry,
    started_at: Instant,

    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,
    pub upstream_latency: HistogramVec,

    pub cassette_reads_total: IntCounterVec,
    pub cassette_writes_total: IntCounterVec,

    pub active_connections: IntGauge,

    // Circuit breaker gauges, updated from `traceforge_store::CircuitBreaker::metrics()`.
    consecutive_failures: AtomicU64,
    circuit_open: std::sync::atomic::AtomicBool,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("traceforge_http_requests_total", "Total HTTP requests")
                .namespace("traceforge"),
            &["route", "status"],
        )?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "traceforge_http_request_duration_seconds",
                "Request latency",
            )
            .namespace("traceforge")
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
            &["route"],
        )?;

        let upstream_latency = HistogramVec::new(
            HistogramOpts::new("traceforge_upstream_latency_seconds", "Upstream response time")
                .namespace("traceforge")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["provider"],
        )?;

        let cassette_reads_total = IntCounterVec::new(
            Opts::new("traceforge_cassette_reads_total", "Cassette read attempts")
                .namespace("traceforge"),
            &["outcome"],
        )?;
        let cassette_writes_total = IntCounterVec::new(
            Opts::new("traceforge_cassette_writes_total", "Cassette write attempts")
                .namespace("traceforge"),
            &["outcome"],
        )?;

        let active_connections = IntGauge::new(
            "traceforge_active_connections",
            "Number of in-flight requests",
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(upstream_latency.clone()))?;
        registry.register(Box::new(cassette_reads_total.clone()))?;
        registry.register(Box::new(cassette_writes_total.clone()))?;
        registry.register(Box::new(active_connections.clone()))?;

        Ok(Self {
            registry,
            started_at: Instant::now(),
            http_requests_total,
            http_request_duration,
            upstream_latency,
            cassette_reads_total,
            cassette_writes_total,
            active_connections,
            consecutive_failures: AtomicU64::new(0),
            circuit_open: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn set_circuit_state(&self, consecutive_failures: u64, open: bool) {
        self.consecutive_failures
            .store(consecutive_failures, Ordering::Relaxed);
        self.circuit_open.store(open, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Render the Prometheus text-exposition format, with the full §6.3
    /// minimum field set appended as gauge lines for scrapers and
    /// non-Prometheus consumers alike: `saved_total`/`failed_total` are
    /// sourced from the caller (the `CircuitBreaker`, the write path's
    /// source of truth), the rest from `snapshot`.
    pub fn render(&self, saved_total: u64, failed_total: u64) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode(&families, &mut buf).ok();
        let mut out = String::from_utf8(buf).unwrap_or_default();

        let snapshot = self.snapshot(saved_total, failed_total);
        out.push_str(&format!("traceforge_storage_traces_saved_total {}\n", snapshot.traces_saved_total));
        out.push_str(&format!("traceforge_storage_traces_failed_total {}\n", snapshot.traces_failed_total));
        out.push_str(&format!("traceforge_storage_consecutive_failures {}\n", snapshot.consecutive_failures));
        out.push_str(&format!(
            "traceforge_storage_circuit_open {}\n",
            if snapshot.circuit_open { 1 } else { 0 }
        ));
        out.push_str(&format!(
            "traceforge_storage_success_rate_percent {}\n",
            snapshot.success_rate_percent
        ));
        out.push_str(&format!("traceforge_uptime_seconds {}\n", snapshot.uptime_seconds));
        out.push_str(&format!("traceforge_memory_usage_mb_rss {}\n", snapshot.memory_usage_mb.rss));
        out.push_str(&format!(
            "traceforge_memory_usage_mb_heap_used {}\n",
            snapshot.memory_usage_mb.heap_used
        ));
        out.push_str(&format!(
            "traceforge_memory_usage_mb_heap_total {}\n",
            snapshot.memory_usage_mb.heap_total
        ));
        out
    }

    /// JSON snapshot matching §6.3's minimum field set, used by `/health`
    /// and tests rather than scraped by Prometheus.
    pub fn snapshot(&self, saved_total: u64, failed_total: u64) -> MetricsSnapshot {
        let success_rate = if saved_total + failed_total == 0 {
            100.0
        } else {
            (saved_total as f64 / (saved_total + failed_total) as f64) * 100.0
        };
        MetricsSnapshot {
            traces_saved_total: saved_total,
            traces_failed_total: failed_total,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            circuit_open: self.circuit_open.load(Ordering::Relaxed),
            success_rate_percent: success_rate,
            uptime_seconds: self.uptime_seconds(),
            memory_usage_mb: read_process_memory_mb(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MemoryUsageMb {
    pub rss: f64,
    pub heap_used: f64,
    pub heap_total: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    #[serde(rename = "storage.traces_saved_total")]
    pub traces_saved_total: u64,
    #[serde(rename = "storage.traces_failed_total")]
    pub traces_failed_total: u64,
    #[serde(rename = "storage.consecutive_failures")]
    pub consecutive_failures: u64,
    #[serde(rename = "storage.circuit_open")]
    pub circuit_open: bool,
    #[serde(rename = "storage.success_rate_percent")]
    pub success_rate_percent: f64,
    pub uptime_seconds: u64,
    pub memory_usage_mb: MemoryUsageMb,
}

/// Sample RSS from `/proc/self/status` on Linux. No cross-platform memory
/// crate is introduced for this minor gauge — on non-Linux platforms this
/// degrades to zeros, which is a documented limitation (§6.3 notes the
/// exact exposure format is negotiable).
#[cfg(target_os = "linux")]
fn read_process_memory_mb() -> MemoryUsageMb {
    let rss_kb = std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|s| {
            s.lines()
                .find(|l| l.starts_with("VmRSS:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|v| v.parse::<f64>().ok())
        })
        .unwrap_or(0.0);
    let rss_mb = rss_kb / 1024.0;
    MemoryUsageMb {
        rss: rss_mb,
        heap_used: rss_mb,
        heap_total: rss_mb,
    }
}

#[cfg(not(target_os = "linux"))]
fn read_process_memory_mb() -> MemoryUsageMb {
    MemoryUsageMb {
        rss: 0.0,
        heap_used: 0.0,
        heap_total: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_contains_the_full_section_6_3_field_set() {
        let m = MetricsCollector::new().unwrap();
        m.http_requests_total.with_label_values(&["/v1/chat/completions", "200"]).inc();
        let text = m.render(9, 1);
        assert!(text.contains("traceforge_http_requests_total"));
        assert!(text.contains("traceforge_storage_traces_saved_total 9"));
        assert!(text.contains("traceforge_storage_traces_failed_total 1"));
        assert!(text.contains("traceforge_storage_consecutive_failures"));
        assert!(text.contains("traceforge_storage_circuit_open"));
        assert!(text.contains("traceforge_storage_success_rate_percent 90"));
        assert!(text.contains("traceforge_uptime_seconds"));
        assert!(text.contains("traceforge_memory_usage_mb_rss"));
        assert!(text.contains("traceforge_memory_usage_mb_heap_used"));
        assert!(text.contains("traceforge_memory_usage_mb_heap_total"));
    }

    #[test]
    fn snapshot_computes_success_rate() {
        let m = MetricsCollector::new().unwrap();
        let snap = m.snapshot(9, 1);
        assert!((snap.success_rate_percent - 90.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_with_no_writes_reports_full_success_rate() {
        let m = MetricsCollector::new().unwrap();
        let snap = m.snapshot(0, 0);
        assert_eq!(snap.success_rate_percent, 100.0);
    }

    #[test]
    fn circuit_state_propagates_into_snapshot() {
        let m = MetricsCollector::new().unwrap();
        m.set_circuit_state(10, true);
        let snap = m.snapshot(0, 10);
        assert_eq!(snap.consecutive_failures, 10);
        assert!(snap.circuit_open);
    }
}
