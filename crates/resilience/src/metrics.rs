use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::failure::FailureKind;

pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,
    cache_hits: AtomicUsize,
    chunked_requests: AtomicUsize,
    total_attempts: AtomicUsize,
    transient_failures: AtomicUsize,

    // Timing (in microseconds)
    total_processing_time_us: AtomicU64,

    // Breakdowns
    strategies: DashMap<String, usize>,
    failures: DashMap<FailureKind, usize>,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            chunked_requests: AtomicUsize::new(0),
            total_attempts: AtomicUsize::new(0),
            transient_failures: AtomicUsize::new(0),
            total_processing_time_us: AtomicU64::new(0),
            strategies: DashMap::new(),
            failures: DashMap::new(),
        })
    }

    pub fn record_request(&self, success: bool, attempts: u32, duration: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        self.total_attempts.fetch_add(attempts as usize, Ordering::Relaxed);
        self.total_processing_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunked(&self) {
        self.chunked_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, kind: FailureKind) {
        if kind.is_transient() {
            self.transient_failures.fetch_add(1, Ordering::Relaxed);
        }
        *self.failures.entry(kind).or_insert(0) += 1;
    }

    pub fn record_strategy(&self, name: &str) {
        *self.strategies.entry(name.to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            chunked_requests: self.chunked_requests.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            success_rate: ratio(successful, total),
            avg_attempts: ratio(self.total_attempts.load(Ordering::Relaxed), total),
            avg_processing_time_ms: ratio(
                self.total_processing_time_us.load(Ordering::Relaxed) as usize,
                total,
            ) / 1000.0,
            strategies_used: self
                .strategies
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            failure_kinds: self
                .failures
                .iter()
                .map(|e| (e.key().as_str().to_string(), *e.value()))
                .collect(),
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub cache_hits: usize,
    pub chunked_requests: usize,
    /// Failures a plain retry could have fixed
    pub transient_failures: usize,
    pub success_rate: f64,
    pub avg_attempts: f64,
    pub avg_processing_time_ms: f64,
    pub strategies_used: BTreeMap<String, usize>,
    pub failure_kinds: BTreeMap<String, usize>,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
