//! Worker health and metrics HTTP surface
//!
//! Every worker process serves three endpoints on `HEALTH_PORT`:
//! - `GET /health`: evaluated health report, always 200 (check semantics
//!   live in the body, never in the status code)
//! - `GET /ready`: 200 once the consume loop has begun, 503 before and
//!   after shutdown starts
//! - `GET /metrics`: raw counters and latency statistics as JSON

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::constants::{
    HEALTH_LOG_INTERVAL_SECS, HEALTH_MAX_AVG_LATENCY_SECS, HEALTH_MAX_IDLE_SECS,
    HEALTH_MIN_SUCCESS_RATE,
};
use crate::core::ShutdownService;
use crate::metrics::{MetricsSnapshot, WorkerMetrics};

/// Readiness flag flipped by the worker runtime
#[derive(Clone, Default)]
pub struct ReadyFlag {
    ready: Arc<AtomicBool>,
}

impl ReadyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
struct HealthState {
    service: String,
    metrics: WorkerMetrics,
    ready: ReadyFlag,
}

/// Per-check result inside the health report
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckResult {
    pub status: &'static str,
    pub message: String,
}

/// Evaluated health report served on `/health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub service: String,
    pub status: &'static str,
    pub checks: Checks,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Checks {
    pub last_processed: CheckResult,
    pub success_rate: CheckResult,
    pub latency: CheckResult,
    pub dlq: CheckResult,
}

/// Evaluate worker health from a metrics snapshot.
///
/// Unhealthy when: nothing processed for 10 minutes (while previously
/// active), success rate below 50 %, or average latency above 60 s. DLQ
/// depth is a warning, never unhealthy by itself.
pub fn evaluate_health(snapshot: &MetricsSnapshot, service: &str) -> HealthReport {
    let mut unhealthy = false;

    let last_processed = match snapshot.last_processed_at {
        Some(at) => {
            let idle_secs = (Utc::now() - at).num_seconds();
            if idle_secs > HEALTH_MAX_IDLE_SECS {
                unhealthy = true;
                CheckResult {
                    status: "unhealthy",
                    message: format!("No processing in {idle_secs} seconds"),
                }
            } else {
                CheckResult {
                    status: "healthy",
                    message: format!("Last processed {idle_secs} seconds ago"),
                }
            }
        }
        None => CheckResult {
            status: "starting",
            message: "No processing recorded yet".to_string(),
        },
    };

    let success_rate = if snapshot.total_processed > 0
        && snapshot.success_rate < HEALTH_MIN_SUCCESS_RATE
    {
        unhealthy = true;
        CheckResult {
            status: "unhealthy",
            message: format!("Success rate {:.2}% is below threshold", snapshot.success_rate),
        }
    } else {
        CheckResult {
            status: "healthy",
            message: format!("Success rate {:.2}%", snapshot.success_rate),
        }
    };

    let latency = if snapshot.latency.avg_seconds > HEALTH_MAX_AVG_LATENCY_SECS {
        unhealthy = true;
        CheckResult {
            status: "unhealthy",
            message: format!(
                "Average latency {:.2}s exceeds threshold",
                snapshot.latency.avg_seconds
            ),
        }
    } else {
        CheckResult {
            status: "healthy",
            message: format!("Average latency {:.2}s", snapshot.latency.avg_seconds),
        }
    };

    let dlq = if snapshot.dlq_count > 0 {
        CheckResult {
            status: "warning",
            message: format!("{} messages in dead letter queue", snapshot.dlq_count),
        }
    } else {
        CheckResult {
            status: "healthy",
            message: "No messages in dead letter queue".to_string(),
        }
    };

    let status = if unhealthy {
        "unhealthy"
    } else if snapshot.total_processed == 0 {
        "starting"
    } else {
        "healthy"
    };

    HealthReport {
        service: service.to_string(),
        status,
        checks: Checks {
            last_processed,
            success_rate,
            latency,
            dlq,
        },
        timestamp: Utc::now().to_rfc3339(),
    }
}

async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    let report = evaluate_health(&state.metrics.snapshot(), &state.service);
    (StatusCode::OK, Json(report))
}

async fn ready(State(state): State<HealthState>) -> impl IntoResponse {
    if state.ready.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics(State(state): State<HealthState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.metrics.snapshot()))
}

fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Spawn the health HTTP server; it stops when shutdown triggers
pub fn spawn_health_server(
    service: &str,
    port: u16,
    metrics: WorkerMetrics,
    ready: ReadyFlag,
    shutdown: &ShutdownService,
) -> JoinHandle<()> {
    let state = HealthState {
        service: service.to_string(),
        metrics,
        ready,
    };
    let app = router(state);
    let wait = shutdown.wait();
    let service_name = service.to_string();

    tokio::spawn(async move {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(port, error = %e, "Failed to bind health server");
                return;
            }
        };

        tracing::info!(service = %service_name, port, "Health server listening");

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(wait)
            .await
        {
            tracing::error!(error = %e, "Health server error");
        }
    })
}

/// Spawn the periodic health log task (5-minute cadence)
pub fn spawn_health_log_task(
    service: &str,
    metrics: WorkerMetrics,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let service = service.to_string();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(HEALTH_LOG_INTERVAL_SECS));
        interval.tick().await; // skip the immediate first tick
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let snapshot = metrics.snapshot();
                    let report = evaluate_health(&snapshot, &service);
                    tracing::info!(
                        service = %service,
                        status = report.status,
                        processed = snapshot.total_processed,
                        success_rate = snapshot.success_rate,
                        dlq = snapshot.dlq_count,
                        p95_seconds = snapshot.latency.p95_seconds,
                        "Health check"
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starting_before_any_processing() {
        let metrics = WorkerMetrics::new();
        let report = evaluate_health(&metrics.snapshot(), "content-moderation");
        assert_eq!(report.status, "starting");
        assert_eq!(report.checks.last_processed.status, "starting");
    }

    #[test]
    fn test_healthy_after_success() {
        let metrics = WorkerMetrics::new();
        metrics.record_success();
        metrics.record_processing_time(0.2);

        let report = evaluate_health(&metrics.snapshot(), "content-moderation");
        assert_eq!(report.status, "healthy");
        assert_eq!(report.checks.success_rate.status, "healthy");
        assert_eq!(report.checks.latency.status, "healthy");
        assert_eq!(report.checks.dlq.status, "healthy");
    }

    #[test]
    fn test_unhealthy_on_low_success_rate() {
        let metrics = WorkerMetrics::new();
        metrics.record_success();
        metrics.record_failure("e1");
        metrics.record_failure("e2");
        metrics.record_failure("e3");

        let report = evaluate_health(&metrics.snapshot(), "image-tagger");
        assert_eq!(report.status, "unhealthy");
        assert_eq!(report.checks.success_rate.status, "unhealthy");
    }

    #[test]
    fn test_dlq_depth_is_warning_not_unhealthy() {
        let metrics = WorkerMetrics::new();
        metrics.record_success();
        metrics.record_dlq();

        let report = evaluate_health(&metrics.snapshot(), "face-recognition");
        assert_eq!(report.status, "healthy");
        assert_eq!(report.checks.dlq.status, "warning");
    }

    #[test]
    fn test_unhealthy_on_high_latency() {
        let metrics = WorkerMetrics::new();
        metrics.record_success();
        metrics.record_processing_time(120.0);

        let report = evaluate_health(&metrics.snapshot(), "scene-recognition");
        assert_eq!(report.status, "unhealthy");
        assert_eq!(report.checks.latency.status, "unhealthy");
    }

    #[test]
    fn test_ready_flag() {
        let flag = ReadyFlag::new();
        assert!(!flag.is_ready());
        flag.mark_ready();
        assert!(flag.is_ready());
        flag.mark_not_ready();
        assert!(!flag.is_ready());
    }
}
