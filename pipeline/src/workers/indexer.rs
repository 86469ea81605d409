//! Search-store indexing worker
//!
//! Consumes sync events, materializes documents by reading the
//! system-of-record row named by a static routing table, and writes to the
//! search store in batches. A batch flushes when it reaches the configured
//! size or when the batch timeout elapses since the batch started,
//! whichever comes first. Sync events are acked even when the sink write
//! ultimately fails: the events are idempotent and upstream re-emits them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::runtime::{WorkerError, WorkerRuntime};
use crate::bus::{BusError, EntryHandler, StreamEntry};
use crate::core::cli::CliConfig;
use crate::core::constants::STREAM_SYNC_QUEUE;
use crate::core::WorkerConfig;
use crate::schemas::{is_supported_version, SyncEvent, SyncOperation};
use crate::search::document::transform_row;
use crate::search::{BulkAction, SearchClient};
use crate::store::{StoreError, StoreService};

const SERVICE_NAME: &str = "es-sync";
const GROUP: &str = "es-sync-group";

/// How often the background flusher checks the batch age
const FLUSH_POLL: Duration = Duration::from_millis(250);

// =============================================================================
// Index routing
// =============================================================================

/// Route from a sync event's `indexType` to the read-model table, the
/// search index, and the table's primary-key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRoute {
    pub table: &'static str,
    pub index: &'static str,
    pub pk_column: &'static str,
}

/// The seven read models kept in sync with the search store
pub fn route(index_type: &str) -> Option<IndexRoute> {
    let route = match index_type {
        "media_search" => IndexRoute {
            table: "media_search",
            index: "media_search",
            pk_column: "media_id",
        },
        "post_search" => IndexRoute {
            table: "post_search",
            index: "post_search",
            pk_column: "post_id",
        },
        "user_search" => IndexRoute {
            table: "user_search",
            index: "user_search",
            pk_column: "user_id",
        },
        "face_search" => IndexRoute {
            table: "face_search",
            index: "face_search",
            pk_column: "face_id",
        },
        "recommendations_knn" => IndexRoute {
            table: "recommendations_knn",
            index: "recommendations_knn",
            pk_column: "user_id",
        },
        "feed_personalized" => IndexRoute {
            table: "feed_personalized",
            index: "feed_personalized",
            pk_column: "user_id",
        },
        "known_faces_index" => IndexRoute {
            table: "known_faces_index",
            index: "known_faces_index",
            pk_column: "face_id",
        },
        _ => return None,
    };
    Some(route)
}

// =============================================================================
// Batch buffer
// =============================================================================

#[derive(Default)]
struct Batch {
    actions: Vec<BulkAction>,
    started: Option<Instant>,
}

/// Shared between the handler (size-triggered flush) and the background
/// flusher task (timeout-triggered flush).
#[derive(Clone)]
pub struct BatchWriter {
    batch: Arc<Mutex<Batch>>,
    search: SearchClient,
    batch_size: usize,
    batch_timeout: Duration,
}

impl BatchWriter {
    pub fn new(search: SearchClient, batch_size: usize, batch_timeout: Duration) -> Self {
        Self {
            batch: Arc::new(Mutex::new(Batch::default())),
            search,
            batch_size,
            batch_timeout,
        }
    }

    /// Queue an action; flushes inline when the batch reaches its size bound
    pub async fn enqueue(&self, action: BulkAction) {
        let ready = {
            let mut batch = self.batch.lock().await;
            if batch.actions.is_empty() {
                batch.started = Some(Instant::now());
            }
            batch.actions.push(action);
            batch.actions.len() >= self.batch_size
        };
        if ready {
            self.flush().await;
        }
    }

    /// Flush when the oldest queued action has waited long enough
    pub async fn flush_if_due(&self) {
        let due = {
            let batch = self.batch.lock().await;
            matches!(batch.started, Some(started) if started.elapsed() >= self.batch_timeout)
        };
        if due {
            self.flush().await;
        }
    }

    /// Write out whatever is queued
    pub async fn flush(&self) {
        let actions = {
            let mut batch = self.batch.lock().await;
            batch.started = None;
            std::mem::take(&mut batch.actions)
        };
        if actions.is_empty() {
            return;
        }

        let failed = self.search.write_batch(&actions).await;
        if failed > 0 {
            tracing::error!(
                count = actions.len(),
                failed,
                "Batch flush completed with failures"
            );
        } else {
            tracing::debug!(count = actions.len(), "Batch flushed");
        }
    }

    /// Background task: timeout-driven flushes plus a final drain on
    /// shutdown.
    pub fn spawn_flusher(
        &self,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let writer = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            writer.flush().await;
                            tracing::debug!("Batch flusher drained on shutdown");
                            break;
                        }
                    }
                    _ = tokio::time::sleep(FLUSH_POLL) => {
                        writer.flush_if_due().await;
                    }
                }
            }
        })
    }
}

// =============================================================================
// Handler
// =============================================================================

struct IndexerHandler {
    runtime: Arc<WorkerRuntime>,
    store: Arc<StoreService>,
    writer: BatchWriter,
}

impl IndexerHandler {
    async fn process(&self, entry: &StreamEntry) -> Result<(), WorkerError> {
        let event = SyncEvent::from_entry(entry)?;

        let Some(route) = route(&event.index_type) else {
            return Err(WorkerError::InvalidPayload(format!(
                "unknown index type '{}'",
                event.index_type
            )));
        };

        tracing::info!(
            index_type = %event.index_type,
            document_id = %event.document_id,
            operation = ?event.operation,
            "Received sync event"
        );

        match event.operation {
            SyncOperation::Delete => {
                self.writer
                    .enqueue(BulkAction::Delete {
                        index: route.index.to_string(),
                        id: event.document_id.clone(),
                    })
                    .await;
            }
            SyncOperation::Index => {
                let row = self
                    .store
                    .fetch_row(route.table, route.pk_column, &event.document_id)
                    .await
                    .map_err(classify_store_error)?;

                let Some(row) = row else {
                    tracing::warn!(
                        table = route.table,
                        document_id = %event.document_id,
                        "Row not found, nothing to index"
                    );
                    return Ok(());
                };

                self.writer
                    .enqueue(BulkAction::Index {
                        index: route.index.to_string(),
                        id: event.document_id.clone(),
                        document: serde_json::Value::Object(transform_row(&row)),
                    })
                    .await;
            }
        }

        Ok(())
    }
}

fn classify_store_error(e: StoreError) -> WorkerError {
    if e.is_transient() {
        WorkerError::Retryable {
            message: e.to_string(),
            kind: "StoreError",
        }
    } else {
        // Schema-level problems will not improve with retries
        WorkerError::InvalidPayload(e.to_string())
    }
}

#[async_trait]
impl EntryHandler for IndexerHandler {
    async fn handle(&self, entry: &StreamEntry) -> Result<(), BusError> {
        if !is_supported_version(entry) {
            tracing::warn!(id = %entry.id, "Skipping sync event with unsupported version");
            return Ok(());
        }

        self.runtime
            .process_with_retry(entry, |_| self.process(entry))
            .await;
        Ok(())
    }
}

/// Bootstrap and run the indexing worker to completion
pub async fn run_indexer(config: WorkerConfig, cli: &CliConfig) -> anyhow::Result<()> {
    let runtime = WorkerRuntime::bootstrap(SERVICE_NAME, config, cli).await?;

    let database_url = runtime
        .config
        .indexer
        .database_url
        .clone()
        .context("es-sync: DATABASE_URL is required")?;
    let store = Arc::new(StoreService::connect(&database_url).await?);

    let search = SearchClient::new(&runtime.config.indexer.search_url);
    search
        .health_check()
        .await
        .context("es-sync: search store unreachable at startup")?;

    let writer = BatchWriter::new(
        search,
        runtime.config.indexer.batch_size,
        runtime.config.indexer.batch_timeout,
    );
    runtime
        .shutdown
        .register(writer.spawn_flusher(runtime.shutdown.subscribe()))
        .await;

    let consumer = runtime
        .bus
        .consumer(STREAM_SYNC_QUEUE, GROUP, runtime.consumer_name.clone())
        .with_dead_letter_sink(runtime.dead_letter_sink());

    let handler = IndexerHandler {
        runtime: Arc::clone(&runtime),
        store: Arc::clone(&store),
        writer: writer.clone(),
    };

    let result = runtime.run_consumer(consumer, &handler).await;

    // Anything enqueued after the flusher's shutdown drain
    writer.flush().await;
    store.close().await;

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_table() {
        let media = route("media_search").unwrap();
        assert_eq!(media.table, "media_search");
        assert_eq!(media.pk_column, "media_id");

        let knn = route("recommendations_knn").unwrap();
        assert_eq!(knn.pk_column, "user_id");

        let faces = route("known_faces_index").unwrap();
        assert_eq!(faces.pk_column, "face_id");

        assert!(route("no_such_model").is_none());
    }

    #[test]
    fn test_route_covers_all_seven() {
        let types = [
            "media_search",
            "post_search",
            "user_search",
            "face_search",
            "recommendations_knn",
            "feed_personalized",
            "known_faces_index",
        ];
        assert!(types.iter().all(|t| route(t).is_some()));
    }

    #[tokio::test]
    async fn test_batch_accumulates_until_size() {
        let writer = BatchWriter::new(
            SearchClient::new("http://127.0.0.1:1"),
            3,
            Duration::from_secs(60),
        );

        for i in 0..2 {
            writer
                .enqueue(BulkAction::Delete {
                    index: "media_search".into(),
                    id: i.to_string(),
                })
                .await;
        }

        let batch = writer.batch.lock().await;
        assert_eq!(batch.actions.len(), 2);
        assert!(batch.started.is_some());
    }

    #[tokio::test]
    async fn test_flush_if_due_respects_timeout() {
        let writer = BatchWriter::new(
            SearchClient::new("http://127.0.0.1:1"),
            50,
            Duration::from_secs(60),
        );
        writer
            .enqueue(BulkAction::Delete {
                index: "media_search".into(),
                id: "1".into(),
            })
            .await;

        // Not due yet: nothing should be flushed
        writer.flush_if_due().await;
        assert_eq!(writer.batch.lock().await.actions.len(), 1);
    }

    #[test]
    fn test_store_error_classification() {
        let transient = classify_store_error(StoreError::Database(sqlx::Error::PoolTimedOut));
        assert!(matches!(transient, WorkerError::Retryable { .. }));

        let permanent = classify_store_error(StoreError::Config("bad".into()));
        assert!(matches!(permanent, WorkerError::InvalidPayload(_)));
    }
}
