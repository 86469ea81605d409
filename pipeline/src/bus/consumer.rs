//! Stream consumer with consumer-group semantics
//!
//! The consume loop interleaves three duties:
//! 1. every `pending_check_interval`, scan the group's pending list and
//!    either reclaim idle entries or route repeatedly-failed ones to the
//!    dead-letter sink
//! 2. block up to `block_ms` reading new entries with cursor `>`
//! 3. dispatch each entry to the handler, acking iff the handler returns Ok
//!
//! An entry left unacked (handler error, consumer crash) stays in the
//! pending set and becomes reclaimable by any group member after
//! `pending_idle`.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{RedisResult, Value as RedisValue};
use deadpool_redis::Pool;
use tokio::sync::watch;
use tokio::time::Instant;

use super::entry::{parse_entry_reply, parse_pending_reply, parse_read_reply, StreamEntry};
use super::error::BusError;
use super::publisher::StreamPublisher;
use crate::core::constants::{
    CONSUME_BLOCK_MS, CONSUME_COUNT, MAX_CLAIM_FAILURES, PENDING_CHECK_INTERVAL_SECS,
    PENDING_IDLE_MS,
};
use crate::schemas::DlqEntry;

/// Pending entries examined per reclaim scan
const PENDING_SCAN_COUNT: usize = 100;

/// Handler invoked once per delivered entry.
///
/// Returning `Ok` acknowledges the entry, including handled failures the
/// worker has already routed to the DLQ. Returning `Err` leaves the entry in
/// the pending set for a later reclaim.
#[async_trait]
pub trait EntryHandler: Send + Sync {
    async fn handle(&self, entry: &StreamEntry) -> Result<(), BusError>;
}

/// Where repeatedly-failed pending entries are routed
#[derive(Clone)]
pub struct DeadLetterSink {
    pub publisher: StreamPublisher,
    pub stream: String,
    pub service: String,
}

/// Per-iteration read tuning
#[derive(Debug, Clone, Copy)]
pub struct ConsumeOptions {
    pub block_ms: u64,
    pub count: usize,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            block_ms: CONSUME_BLOCK_MS,
            count: CONSUME_COUNT,
        }
    }
}

pub struct StreamConsumer {
    pool: Pool,
    stream: String,
    group: String,
    consumer: String,
    dlq: Option<DeadLetterSink>,
    pending_check_interval: Duration,
    pending_idle_ms: u64,
    max_claim_failures: u64,
}

impl StreamConsumer {
    pub(crate) fn new(
        pool: Pool,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            dlq: None,
            pending_check_interval: Duration::from_secs(PENDING_CHECK_INTERVAL_SECS),
            pending_idle_ms: PENDING_IDLE_MS,
            max_claim_failures: MAX_CLAIM_FAILURES,
        }
    }

    /// Route entries that keep failing reclaim to a dead-letter stream
    pub fn with_dead_letter_sink(mut self, sink: DeadLetterSink) -> Self {
        self.dlq = Some(sink);
        self
    }

    /// Override reclaim tuning (tests and special-purpose consumers)
    pub fn with_reclaim(
        mut self,
        check_interval: Duration,
        idle_ms: u64,
        max_claim_failures: u64,
    ) -> Self {
        self.pending_check_interval = check_interval;
        self.pending_idle_ms = idle_ms;
        self.max_claim_failures = max_claim_failures;
        self
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Create the consumer group at position "0" (replay all) if absent
    pub async fn ensure_group(&self) -> Result<(), BusError> {
        let mut conn = self.pool.get().await?;

        let result: RedisResult<String> = deadpool_redis::redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                tracing::info!(stream = %self.stream, group = %self.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(BusError::ConsumerGroup(format!(
                "Failed to create consumer group {}: {e}",
                self.group
            ))),
        }
    }

    /// Read up to `count` new entries, blocking up to `block_ms`
    pub async fn read(&self, block_ms: u64, count: usize) -> Result<Vec<StreamEntry>, BusError> {
        let mut conn = self.pool.get().await?;

        let reply: RedisValue = deadpool_redis::redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(&self.stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        Ok(parse_read_reply(reply))
    }

    /// Acknowledge an entry, removing it from the group's pending set
    pub async fn ack(&self, id: &str) -> Result<(), BusError> {
        let mut conn = self.pool.get().await?;
        let _: i64 = deadpool_redis::redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Run the consume loop until shutdown is signaled.
    ///
    /// Bus failures are absorbed: a lost consumer group is recreated (2 s
    /// pause), any other error is logged and retried after 1 s.
    pub async fn consume(
        &self,
        handler: &dyn EntryHandler,
        options: ConsumeOptions,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), BusError> {
        self.ensure_group().await?;

        tracing::info!(
            stream = %self.stream,
            group = %self.group,
            consumer = %self.consumer,
            "Consumer loop starting"
        );

        let mut last_pending_scan = Instant::now();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if last_pending_scan.elapsed() >= self.pending_check_interval {
                if let Err(e) = self.process_pending(handler).await {
                    tracing::warn!(
                        stream = %self.stream,
                        error = %e,
                        "Pending scan failed"
                    );
                }
                last_pending_scan = Instant::now();
            }

            match self.read(options.block_ms, options.count).await {
                Ok(entries) => {
                    for entry in entries {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        self.dispatch(handler, &entry).await;
                    }
                }
                Err(e) if is_missing_group(&e) => {
                    // Group deleted mid-run (e.g. stream key recreated):
                    // recreate from "0" so pending history replays.
                    tracing::warn!(
                        stream = %self.stream,
                        group = %self.group,
                        "Consumer group lost, recreating"
                    );
                    if let Err(create_err) = self.ensure_group().await {
                        tracing::error!(error = %create_err, "Failed to recreate consumer group");
                    }
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
                Err(e) => {
                    tracing::error!(stream = %self.stream, error = %e, "Consumer read failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        tracing::info!(stream = %self.stream, consumer = %self.consumer, "Consumer loop stopped");
        Ok(())
    }

    /// Invoke the handler and ack on success; leave pending on error
    async fn dispatch(&self, handler: &dyn EntryHandler, entry: &StreamEntry) {
        match handler.handle(entry).await {
            Ok(()) => {
                if let Err(e) = self.ack(&entry.id).await {
                    tracing::warn!(id = %entry.id, error = %e, "Failed to ack entry");
                }
            }
            Err(e) => {
                tracing::warn!(
                    id = %entry.id,
                    error = %e,
                    "Handler failed, leaving entry pending for reclaim"
                );
            }
        }
    }

    /// Scan the pending list; claim idle entries or route exhausted ones to
    /// the dead-letter sink.
    async fn process_pending(&self, handler: &dyn EntryHandler) -> Result<(), BusError> {
        let pending = {
            let mut conn = self.pool.get().await?;
            let reply: RedisValue = deadpool_redis::redis::cmd("XPENDING")
                .arg(&self.stream)
                .arg(&self.group)
                .arg("-")
                .arg("+")
                .arg(PENDING_SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            parse_pending_reply(reply)
        };

        for item in pending {
            if item.idle_ms < self.pending_idle_ms {
                continue;
            }

            if item.delivery_count >= self.max_claim_failures && self.dlq.is_some() {
                if let Err(e) = self.route_poison(&item.id, item.delivery_count).await {
                    tracing::error!(id = %item.id, error = %e, "Failed to dead-letter poison entry");
                }
                continue;
            }

            match self.claim(&item.id).await {
                Ok(entries) => {
                    for entry in &entries {
                        tracing::info!(
                            id = %entry.id,
                            from_consumer = %item.consumer,
                            idle_ms = item.idle_ms,
                            deliveries = item.delivery_count,
                            "Reclaimed idle entry"
                        );
                        self.dispatch(handler, entry).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(id = %item.id, error = %e, "Failed to claim pending entry");
                }
            }
        }

        Ok(())
    }

    /// Transfer the lease on a pending entry to this consumer
    async fn claim(&self, id: &str) -> Result<Vec<StreamEntry>, BusError> {
        let mut conn = self.pool.get().await?;
        let reply: RedisValue = deadpool_redis::redis::cmd("XCLAIM")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(self.pending_idle_ms)
            .arg(id)
            .query_async(&mut conn)
            .await?;
        Ok(parse_entry_reply(reply))
    }

    /// Read the original entry by id, emit it to the dead-letter sink, then
    /// ack so it stops being reclaimed.
    async fn route_poison(&self, id: &str, delivery_count: u64) -> Result<(), BusError> {
        let Some(sink) = &self.dlq else {
            return Ok(());
        };

        let entries = {
            let mut conn = self.pool.get().await?;
            let reply: RedisValue = deadpool_redis::redis::cmd("XRANGE")
                .arg(&self.stream)
                .arg(id)
                .arg(id)
                .query_async(&mut conn)
                .await?;
            parse_entry_reply(reply)
        };

        match entries.into_iter().next() {
            Some(original) => {
                let envelope = DlqEntry::for_entry(
                    &original,
                    &sink.service,
                    &format!("Entry exceeded {delivery_count} deliveries without ack"),
                    "MaxDeliveriesExceeded",
                    delivery_count as u32,
                );
                sink.publisher
                    .append_default(&sink.stream, &envelope.to_fields())
                    .await?;
                tracing::error!(
                    id,
                    stream = %self.stream,
                    deliveries = delivery_count,
                    "Routed poison entry to dead-letter stream"
                );
            }
            None => {
                // Trimmed out from under the pending set; nothing to forward.
                tracing::warn!(id, stream = %self.stream, "Poison entry no longer in stream");
            }
        }

        self.ack(id).await
    }
}

fn is_missing_group(err: &BusError) -> bool {
    err.to_string().contains("NOGROUP")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_consume_options() {
        let options = ConsumeOptions::default();
        assert_eq!(options.block_ms, 5_000);
        assert_eq!(options.count, 10);
    }

    #[test]
    fn test_missing_group_detection() {
        let err = BusError::Stream(
            "NOGROUP No such consumer group 'g' for key name 'post-image-processing'".to_string(),
        );
        assert!(is_missing_group(&err));
        assert!(!is_missing_group(&BusError::Stream("timeout".to_string())));
    }
}
