//! Dead-letter queue processor
//!
//! Drains the dead-letter stream, logs every envelope with its full
//! context, and, when auto-retry is enabled, re-appends the original
//! payload to the image-jobs stream with markers so downstream loops can be
//! detected. No dead-letter sink is attached here: poison entries on the
//! DLQ itself must never be routed back onto it.

use std::sync::Arc;

use async_trait::async_trait;

use super::runtime::{WorkerError, WorkerRuntime};
use crate::bus::{BusError, EntryHandler, StreamEntry};
use crate::core::cli::CliConfig;
use crate::core::constants::{STREAM_DLQ, STREAM_IMAGE_JOBS};
use crate::core::WorkerConfig;
use crate::schemas::{is_supported_version, DlqEntry};

const SERVICE_NAME: &str = "dlq-processor";
const GROUP: &str = "dlq-processor-group";

struct DlqHandler {
    runtime: Arc<WorkerRuntime>,
    auto_retry: bool,
}

impl DlqHandler {
    async fn process(&self, entry: &StreamEntry) -> Result<(), WorkerError> {
        let envelope = DlqEntry::from_entry(entry)?;

        tracing::error!(
            dlq_id = %entry.id,
            original_message_id = %envelope.original_message_id,
            failed_service = %envelope.service,
            error = %envelope.error,
            error_type = %envelope.error_type,
            retry_count = envelope.retry_count,
            original_data = %envelope.original_data,
            "Dead-letter entry received"
        );

        if !self.auto_retry {
            tracing::info!(
                original_message_id = %envelope.original_message_id,
                "Auto-retry disabled, entry logged only"
            );
            return Ok(());
        }

        let Some(mut fields) = envelope.original_fields() else {
            tracing::warn!(
                dlq_id = %entry.id,
                "Original payload is not a field map, cannot requeue"
            );
            return Ok(());
        };

        // Loop-detection markers for downstream consumers
        fields.insert("dlqRetry".into(), "true".into());
        fields.insert("dlqOriginalService".into(), envelope.service.clone());
        fields.insert(
            "dlqOriginalMessageId".into(),
            envelope.original_message_id.clone(),
        );

        self.runtime
            .publisher
            .append_default(STREAM_IMAGE_JOBS, &fields)
            .await
            .map_err(|e| WorkerError::Retryable {
                message: format!("requeue publish failed: {e}"),
                kind: "BusError",
            })?;

        tracing::info!(
            original_message_id = %envelope.original_message_id,
            failed_service = %envelope.service,
            retry_stream = STREAM_IMAGE_JOBS,
            "Entry re-published for retry"
        );

        Ok(())
    }
}

#[async_trait]
impl EntryHandler for DlqHandler {
    async fn handle(&self, entry: &StreamEntry) -> Result<(), BusError> {
        if !is_supported_version(entry) {
            tracing::warn!(id = %entry.id, "Skipping DLQ entry with unsupported version");
            return Ok(());
        }

        self.runtime
            .process_with_retry(entry, |_| self.process(entry))
            .await;
        Ok(())
    }
}

/// Bootstrap and run the DLQ processor to completion
pub async fn run_dlq_processor(config: WorkerConfig, cli: &CliConfig) -> anyhow::Result<()> {
    let runtime = WorkerRuntime::bootstrap(SERVICE_NAME, config, cli).await?;
    let auto_retry = runtime.config.dlq_auto_retry;

    tracing::info!(
        auto_retry,
        input_stream = STREAM_DLQ,
        retry_stream = if auto_retry { STREAM_IMAGE_JOBS } else { "n/a" },
        "DLQ processor configuration"
    );

    if let Ok(stats) = runtime.bus.stats(STREAM_DLQ, GROUP).await {
        tracing::info!(
            depth = stats.length,
            pending = stats.pending,
            "Dead-letter stream state at startup"
        );
    }

    let consumer = runtime
        .bus
        .consumer(STREAM_DLQ, GROUP, runtime.consumer_name.clone());

    let handler = DlqHandler {
        runtime: Arc::clone(&runtime),
        auto_retry,
    };
    runtime.run_consumer(consumer, &handler).await
}
