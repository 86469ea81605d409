//! Worker runtime skeleton
//!
//! Everything an individual worker process shares: bus bootstrap, health
//! surfaces, the shutdown wiring, and the per-message retry envelope with
//! dead-letter routing. Worker binaries differ only in the handler (and the
//! streams) they plug into this skeleton.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use thiserror::Error;

use crate::bus::{Bus, ConsumeOptions, DeadLetterSink, EntryHandler, StreamEntry, StreamPublisher};
use crate::core::cli::CliConfig;
use crate::core::constants::STREAM_DLQ;
use crate::core::{ShutdownService, WorkerConfig};
use crate::health::{spawn_health_log_task, spawn_health_server, ReadyFlag};
use crate::metrics::WorkerMetrics;
use crate::providers::ProviderError;
use crate::schemas::{DlqEntry, SchemaError};
use crate::utils::downloader::DownloadError;
use crate::utils::retry::next_delay;
use crate::utils::url_guard::UrlGuardError;

/// Handler-level error taxonomy driving retry/ack/DLQ decisions
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Transient failure: retried with backoff, dead-lettered on exhaustion
    #[error("{message}")]
    Retryable { message: String, kind: &'static str },

    /// Permanent upstream failure (non-429 4xx): dead-lettered immediately
    #[error("{message}")]
    Permanent { message: String, kind: &'static str },

    /// A utility already spent its own retry budget: dead-lettered with the
    /// attempts it made
    #[error("{message}")]
    Exhausted {
        message: String,
        kind: &'static str,
        attempts: u32,
    },

    /// Malformed entry: acked and dropped, never dead-lettered
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// SSRF or other policy rejection: acked and dropped, never dead-lettered
    #[error("Policy rejected: {0}")]
    PolicyReject(String),
}

impl From<SchemaError> for WorkerError {
    fn from(e: SchemaError) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}

impl From<UrlGuardError> for WorkerError {
    fn from(e: UrlGuardError) -> Self {
        Self::PolicyReject(e.to_string())
    }
}

impl From<ProviderError> for WorkerError {
    fn from(e: ProviderError) -> Self {
        if e.is_retryable() {
            Self::Retryable {
                message: e.to_string(),
                kind: e.kind(),
            }
        } else {
            Self::Permanent {
                message: e.to_string(),
                kind: e.kind(),
            }
        }
    }
}

impl WorkerError {
    /// Classify a download failure that already went through the
    /// downloader's bounded retry.
    pub fn from_download(e: DownloadError, attempts: u32) -> Self {
        if e.is_retryable() {
            Self::Exhausted {
                message: e.to_string(),
                kind: "DownloadError",
                attempts,
            }
        } else {
            Self::Permanent {
                message: e.to_string(),
                kind: "DownloadError",
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Retryable { kind, .. }
            | Self::Permanent { kind, .. }
            | Self::Exhausted { kind, .. } => kind,
            Self::InvalidPayload(_) => "InvalidPayload",
            Self::PolicyReject(_) => "PolicyReject",
        }
    }
}

/// Shared per-process worker state
pub struct WorkerRuntime {
    pub service: &'static str,
    pub config: WorkerConfig,
    pub bus: Bus,
    pub publisher: StreamPublisher,
    pub metrics: WorkerMetrics,
    pub ready: ReadyFlag,
    pub shutdown: ShutdownService,
    pub consumer_name: String,
}

impl WorkerRuntime {
    /// Connect the bus, install signal handlers, and start the health
    /// server and periodic health log. Fails (non-zero exit upstream) when
    /// the bus is unreachable.
    pub async fn bootstrap(
        service: &'static str,
        config: WorkerConfig,
        cli: &CliConfig,
    ) -> anyhow::Result<Arc<Self>> {
        let redis_url = cli.redis_url.clone().unwrap_or_else(|| config.redis_url.clone());
        let health_port = cli.health_port.unwrap_or(config.health_port);
        let consumer_name = cli
            .consumer_name
            .clone()
            .unwrap_or_else(|| format!("{service}-{}", uuid::Uuid::new_v4()));

        let bus = Bus::connect(&redis_url)
            .await
            .with_context(|| format!("{service}: bus unreachable at startup"))?;
        let publisher = bus.publisher();

        let metrics = WorkerMetrics::new();
        let ready = ReadyFlag::new();
        let shutdown = ShutdownService::new();
        shutdown.install_signal_handlers();

        shutdown
            .register(spawn_health_server(
                service,
                health_port,
                metrics.clone(),
                ready.clone(),
                &shutdown,
            ))
            .await;
        shutdown
            .register(spawn_health_log_task(
                service,
                metrics.clone(),
                shutdown.subscribe(),
            ))
            .await;

        tracing::info!(service, consumer = %consumer_name, "Worker starting");

        Ok(Arc::new(Self {
            service,
            config,
            bus,
            publisher,
            metrics,
            ready,
            shutdown,
            consumer_name,
        }))
    }

    /// A dead-letter sink carrying this worker's identity
    pub fn dead_letter_sink(&self) -> DeadLetterSink {
        DeadLetterSink {
            publisher: self.publisher.clone(),
            stream: STREAM_DLQ.to_string(),
            service: self.service.to_string(),
        }
    }

    /// Run a consumer loop to completion: mark ready, consume until
    /// shutdown, mark not ready, then drain background tasks.
    pub async fn run_consumer(
        &self,
        consumer: crate::bus::StreamConsumer,
        handler: &dyn EntryHandler,
    ) -> anyhow::Result<()> {
        self.ready.mark_ready();
        tracing::info!(service = self.service, "Worker ready — waiting for messages");

        let result = consumer
            .consume(handler, ConsumeOptions::default(), self.shutdown.subscribe())
            .await;

        self.ready.mark_not_ready();
        self.shutdown.shutdown().await;

        result.map_err(|e| anyhow::anyhow!("{}: consumer failed: {e}", self.service))?;
        tracing::info!(service = self.service, "Worker shut down complete");
        Ok(())
    }

    /// Per-message retry envelope.
    ///
    /// Runs `operation` (which receives the zero-based attempt index) under
    /// the configured backoff schedule, records metrics, and emits exactly
    /// one DLQ entry when the budget is spent or the failure is permanent.
    /// Always returns normally so the caller can ack.
    pub async fn process_with_retry<F, Fut>(&self, entry: &StreamEntry, mut operation: F)
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<(), WorkerError>>,
    {
        let schedule = &self.config.retry;
        let started = Instant::now();
        let mut delay = schedule.initial_delay;
        let mut attempt: u32 = 0;

        loop {
            match operation(attempt).await {
                Ok(()) => {
                    self.metrics.record_processing_time(started.elapsed().as_secs_f64());
                    self.metrics.record_success();
                    return;
                }
                Err(WorkerError::InvalidPayload(message)) => {
                    tracing::error!(
                        service = self.service,
                        id = %entry.id,
                        reason = %message,
                        "Dropping invalid entry"
                    );
                    self.record_failure(started, &message);
                    return;
                }
                Err(WorkerError::PolicyReject(message)) => {
                    tracing::error!(
                        service = self.service,
                        id = %entry.id,
                        reason = %message,
                        "Dropping policy-rejected entry"
                    );
                    self.record_failure(started, &message);
                    return;
                }
                Err(e @ WorkerError::Permanent { .. }) => {
                    self.record_failure(started, &e.to_string());
                    self.emit_dlq(entry, &e, attempt).await;
                    return;
                }
                Err(WorkerError::Exhausted {
                    message,
                    kind,
                    attempts,
                }) => {
                    self.record_failure(started, &message);
                    let error = WorkerError::Exhausted {
                        message,
                        kind,
                        attempts,
                    };
                    self.emit_dlq(entry, &error, attempts.saturating_sub(1)).await;
                    return;
                }
                Err(e @ WorkerError::Retryable { .. }) => {
                    if attempt < schedule.max_retries {
                        self.metrics.record_retry();
                        tracing::warn!(
                            service = self.service,
                            id = %entry.id,
                            attempt = attempt + 1,
                            attempts = schedule.max_retries + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Processing failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        delay = next_delay(delay, schedule);
                        attempt += 1;
                    } else {
                        self.record_failure(started, &e.to_string());
                        self.emit_dlq(entry, &e, attempt).await;
                        return;
                    }
                }
            }
        }
    }

    fn record_failure(&self, started: Instant, message: &str) {
        self.metrics.record_processing_time(started.elapsed().as_secs_f64());
        self.metrics.record_failure(message);
    }

    /// Write the dead-letter envelope; failures here are logged, never
    /// propagated (the entry is still acked to keep the stream moving).
    async fn emit_dlq(&self, entry: &StreamEntry, error: &WorkerError, retry_count: u32) {
        let envelope = DlqEntry::for_entry(
            entry,
            self.service,
            &error.to_string(),
            error.kind(),
            retry_count,
        );

        match self
            .publisher
            .append_default(STREAM_DLQ, &envelope.to_fields())
            .await
        {
            Ok(dlq_id) => {
                self.metrics.record_dlq();
                tracing::error!(
                    service = self.service,
                    id = %entry.id,
                    dlq_id = %dlq_id,
                    retry_count,
                    error = %error,
                    "Entry routed to dead-letter stream"
                );
            }
            Err(e) => {
                tracing::error!(
                    service = self.service,
                    id = %entry.id,
                    error = %e,
                    "Failed to publish dead-letter entry"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_classification() {
        let retryable: WorkerError = ProviderError::Status { status: 503 }.into();
        assert!(matches!(retryable, WorkerError::Retryable { .. }));

        let permanent: WorkerError = ProviderError::Status { status: 404 }.into();
        assert!(matches!(permanent, WorkerError::Permanent { .. }));
        assert_eq!(permanent.kind(), "HTTPError");
    }

    #[test]
    fn test_download_error_classification() {
        let exhausted =
            WorkerError::from_download(DownloadError::Status { status: 502 }, 4);
        assert!(matches!(exhausted, WorkerError::Exhausted { attempts: 4, .. }));

        let permanent =
            WorkerError::from_download(DownloadError::Status { status: 404 }, 1);
        assert!(matches!(permanent, WorkerError::Permanent { .. }));
    }

    #[test]
    fn test_policy_reject_kind() {
        let e: WorkerError = UrlGuardError::Empty.into();
        assert!(matches!(e, WorkerError::PolicyReject(_)));
        assert_eq!(e.kind(), "PolicyReject");
    }
}
