//! Generic per-image analysis worker
//!
//! All five analysis workers share this implementation; they differ only in
//! consumer group, output stream, and the provider they invoke (see
//! [`super::tasks`]). Per-message flow: decode and validate the job, SSRF
//! check, bounded-retry download, provider call, publish the result with an
//! inherited correlation id.

use std::sync::Arc;

use async_trait::async_trait;

use super::runtime::{WorkerError, WorkerRuntime};
use crate::bus::{BusError, EntryHandler, Fields, StreamEntry};
use crate::core::cli::CliConfig;
use crate::core::constants::STREAM_IMAGE_JOBS;
use crate::core::WorkerConfig;
use crate::schemas::{is_supported_version, ImageJob};
use crate::utils::downloader::download_image;
use crate::utils::url_guard::validate_image_url;

/// One analysis task plugged into the shared worker skeleton
#[async_trait]
pub trait AnalysisTask: Send + Sync {
    /// Worker identity, used for DLQ envelopes, health, and logs
    fn service(&self) -> &'static str;

    /// Consumer group on the image-jobs stream
    fn group(&self) -> &'static str;

    /// Stream the result message is appended to
    fn output_stream(&self) -> &'static str;

    /// Run the provider and build the result entry fields
    async fn analyze(&self, image: &[u8], job: &ImageJob) -> Result<Fields, WorkerError>;
}

pub struct AnalysisHandler {
    runtime: Arc<WorkerRuntime>,
    task: Arc<dyn AnalysisTask>,
}

impl AnalysisHandler {
    pub fn new(runtime: Arc<WorkerRuntime>, task: Arc<dyn AnalysisTask>) -> Self {
        Self { runtime, task }
    }

    async fn process(&self, entry: &StreamEntry) -> Result<(), WorkerError> {
        let job = ImageJob::from_entry(entry)?;

        tracing::info!(
            service = self.task.service(),
            id = %entry.id,
            media_id = %job.media_id,
            post_id = %job.post_id,
            correlation_id = %job.correlation_id,
            "Received analysis job"
        );

        validate_image_url(&job.media_url, &self.runtime.config.ssrf).await?;

        let image = download_image(
            &job.media_url,
            &self.runtime.config.retry,
            &job.correlation_id,
        )
        .await
        .map_err(|(e, attempts)| WorkerError::from_download(e, attempts))?;

        let fields = self.task.analyze(&image, &job).await?;

        self.runtime
            .publisher
            .append_default(self.task.output_stream(), &fields)
            .await
            .map_err(|e: BusError| WorkerError::Retryable {
                message: format!("result publish failed: {e}"),
                kind: "BusError",
            })?;

        tracing::info!(
            service = self.task.service(),
            media_id = %job.media_id,
            stream = self.task.output_stream(),
            correlation_id = %job.correlation_id,
            "Published result"
        );

        Ok(())
    }
}

#[async_trait]
impl EntryHandler for AnalysisHandler {
    async fn handle(&self, entry: &StreamEntry) -> Result<(), BusError> {
        if !is_supported_version(entry) {
            tracing::warn!(
                service = self.task.service(),
                id = %entry.id,
                version = entry.get_or_empty("version"),
                "Skipping entry with unsupported version"
            );
            return Ok(());
        }

        self.runtime
            .process_with_retry(entry, |_| self.process(entry))
            .await;
        Ok(())
    }
}

/// Bootstrap and run one analysis worker process to completion
pub async fn run_analysis_worker(
    task: Arc<dyn AnalysisTask>,
    config: WorkerConfig,
    cli: &CliConfig,
) -> anyhow::Result<()> {
    let runtime = WorkerRuntime::bootstrap(task.service(), config, cli).await?;

    let consumer = runtime
        .bus
        .consumer(STREAM_IMAGE_JOBS, task.group(), runtime.consumer_name.clone())
        .with_dead_letter_sink(runtime.dead_letter_sink());

    let handler = AnalysisHandler::new(Arc::clone(&runtime), task);
    runtime.run_consumer(consumer, &handler).await
}
