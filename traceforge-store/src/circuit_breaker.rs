use std::sync::Mutex;
use std::time::{Duration, Instant};

const FAILURE_THRESHOLD: u64 = 10;
const OPEN_COOLDOWN: Duration = Duration::from_secs(60);
const HALF_OPEN_PRELOAD: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    consecutive_failures: u64,
    saved_total: u64,
    failed_total: u64,
    last_failure_time: Option<Instant>,
    opened_at: Option<Instant>,
}

/// Process-wide write breaker for the storage layer (§4.4). Shared by the
/// Trace Recorder and consulted by `/health`; a single instance per process,
/// guarded by a plain `Mutex` since transitions are rare relative to the
/// request rate they gate.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitMetrics {
    pub saved_total: u64,
    pub failed_total: u64,
    pub consecutive_failures: u64,
    pub last_failure_time: Option<chrono::DateTime<chrono::Utc>>,
    pub circuit_open: bool,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                saved_total: 0,
                failed_total: 0,
                last_failure_time: None,
                opened_at: None,
            }),
        }
    }

    /// Transition open->half-open if the cooldown has elapsed. Must be
    /// called (directly or via `is_open`) before any state read, since
    /// the breaker has no background timer of its own.
    fn tick(&self, inner: &mut Inner) {
        if inner.state == State::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= OPEN_COOLDOWN {
                    inner.state = State::HalfOpen;
                    inner.consecutive_failures = HALF_OPEN_PRELOAD;
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.tick(&mut inner);
        inner.saved_total += 1;
        match inner.state {
            State::Closed => {
                inner.consecutive_failures = 0;
            }
            State::HalfOpen => {
                inner.state = State::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
            }
            State::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.tick(&mut inner);
        inner.failed_total += 1;
        inner.last_failure_time = Some(Instant::now());
        match inner.state {
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= FAILURE_THRESHOLD {
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            State::HalfOpen => {
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_failures = FAILURE_THRESHOLD;
            }
            State::Open => {}
        }
    }

    pub fn is_open(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        self.tick(&mut inner);
        inner.state == State::Open
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let mut inner = self.inner.lock().unwrap();
        self.tick(&mut inner);
        CircuitMetrics {
            saved_total: inner.saved_total,
            failed_total: inner.failed_total,
            consecutive_failures: inner.consecutive_failures,
            last_failure_time: inner.last_failure_time.map(|_| chrono::Utc::now()),
            circuit_open: inner.state == State::Open,
        }
    }

    pub fn success_rate(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        let total = inner.saved_total + inner.failed_total;
        if total == 0 {
            100.0
        } else {
            (inner.saved_total as f64 / total as f64) * 100.0
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_stays_closed_under_threshold() {
        let cb = CircuitBreaker::new();
        for _ in 0..9 {
            cb.record_failure();
        }
        assert!(!cb.is_open());
    }

    #[test]
    fn opens_at_ten_consecutive_failures() {
        let cb = CircuitBreaker::new();
        for _ in 0..10 {
            cb.record_failure();
        }
        assert!(cb.is_open());
    }

    #[test]
    fn success_resets_consecutive_counter() {
        let cb = CircuitBreaker::new();
        for _ in 0..9 {
            cb.record_failure();
        }
        cb.record_success();
        assert_eq!(cb.metrics().consecutive_failures, 0);
        assert!(!cb.is_open());
    }

    #[test]
    fn success_rate_is_full_with_no_writes() {
        let cb = CircuitBreaker::new();
        assert_eq!(cb.success_rate(), 100.0);
    }

    #[test]
    fn success_rate_reflects_mixed_outcomes() {
        let cb = CircuitBreaker::new();
        cb.record_success();
        cb.record_success();
        cb.record_failure();
        assert!((cb.success_rate() - 66.66666666666667).abs() < 1e-9);
    }
}
