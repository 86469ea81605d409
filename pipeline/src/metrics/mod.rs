//! Process-wide worker metrics
//!
//! One [`WorkerMetrics`] per worker process, shared by the handler, the
//! health server, and the periodic health log task. Deliberately
//! process-scoped: cross-process rollup is an operator concern handled by
//! scraping `/metrics`. The last 1 000 per-message latencies are retained
//! for percentile calculation.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Latency samples retained for percentiles
const LATENCY_WINDOW: usize = 1_000;

#[derive(Default)]
struct MetricsInner {
    processing_times: VecDeque<f64>,
    success_count: u64,
    failure_count: u64,
    retry_count: u64,
    dlq_count: u64,
    last_processed_at: Option<DateTime<Utc>>,
    last_error_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Thread-safe metrics accumulator
#[derive(Clone, Default)]
pub struct WorkerMetrics {
    inner: Arc<Mutex<MetricsInner>>,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record per-message processing latency in seconds
    pub fn record_processing_time(&self, seconds: f64) {
        let mut inner = self.inner.lock();
        inner.processing_times.push_back(seconds);
        while inner.processing_times.len() > LATENCY_WINDOW {
            inner.processing_times.pop_front();
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.success_count += 1;
        inner.last_processed_at = Some(Utc::now());
    }

    pub fn record_failure(&self, error: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_error_at = Some(Utc::now());
        inner.last_error = Some(error.into());
    }

    pub fn record_retry(&self) {
        self.inner.lock().retry_count += 1;
    }

    pub fn record_dlq(&self) {
        self.inner.lock().dlq_count += 1;
    }

    /// Consistent point-in-time view with derived statistics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();

        let total_processed = inner.success_count + inner.failure_count;
        let success_rate = if total_processed > 0 {
            (inner.success_count as f64 / total_processed as f64) * 100.0
        } else {
            0.0
        };

        let latency = LatencyStats::from_samples(inner.processing_times.iter().copied());

        MetricsSnapshot {
            total_processed,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
            success_rate: round2(success_rate),
            retry_count: inner.retry_count,
            dlq_count: inner.dlq_count,
            latency,
            last_processed_at: inner.last_processed_at,
            last_error_at: inner.last_error_at,
            last_error: inner.last_error.clone(),
        }
    }
}

/// Derived latency statistics over the retained window
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyStats {
    pub avg_seconds: f64,
    pub min_seconds: f64,
    pub max_seconds: f64,
    pub p50_seconds: f64,
    pub p95_seconds: f64,
    pub p99_seconds: f64,
}

impl LatencyStats {
    fn from_samples(samples: impl Iterator<Item = f64>) -> Self {
        let mut sorted: Vec<f64> = samples.collect();
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let sum: f64 = sorted.iter().sum();
        let len = sorted.len();
        let pick = |q: f64| sorted[((len as f64 * q) as usize).min(len - 1)];

        Self {
            avg_seconds: round3(sum / len as f64),
            min_seconds: round3(sorted[0]),
            max_seconds: round3(sorted[len - 1]),
            p50_seconds: round3(pick(0.5)),
            p95_seconds: round3(pick(0.95)),
            p99_seconds: round3(pick(0.99)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_processed: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub retry_count: u64,
    pub dlq_count: u64,
    pub latency: LatencyStats,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
