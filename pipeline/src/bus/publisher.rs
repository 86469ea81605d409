//! Stream publisher
//!
//! Appends flat field maps to streams with bounded retention: every append
//! applies an approximate `MAXLEN ~` trim so streams cannot grow unbounded.
//! The batch variant pipelines its XADDs into a single round trip.

use deadpool_redis::redis::Value as RedisValue;
use deadpool_redis::Pool;

use super::entry::Fields;
use super::error::BusError;
use crate::core::constants::DEFAULT_STREAM_MAXLEN;

#[derive(Clone)]
pub struct StreamPublisher {
    pool: Pool,
}

impl StreamPublisher {
    pub(crate) fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Append one entry, returning the id assigned by the bus.
    ///
    /// `maxlen` is applied as an approximate trim; the bus may keep slightly
    /// more entries than requested.
    pub async fn append(
        &self,
        stream: &str,
        fields: &Fields,
        maxlen: u64,
    ) -> Result<String, BusError> {
        let mut conn = self.pool.get().await?;

        let mut cmd = deadpool_redis::redis::cmd("XADD");
        cmd.arg(stream).arg("MAXLEN").arg("~").arg(maxlen).arg("*");
        for (name, value) in fields {
            cmd.arg(name).arg(value);
        }

        let id: String = cmd.query_async(&mut conn).await?;
        tracing::debug!(stream, id = %id, "Appended entry");
        Ok(id)
    }

    /// Append with the default retention bound
    pub async fn append_default(&self, stream: &str, fields: &Fields) -> Result<String, BusError> {
        self.append(stream, fields, DEFAULT_STREAM_MAXLEN).await
    }

    /// Append many entries in one pipelined round trip, returning their ids
    pub async fn append_batch(
        &self,
        stream: &str,
        batch: &[Fields],
        maxlen: u64,
    ) -> Result<Vec<String>, BusError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;

        let mut pipe = deadpool_redis::redis::pipe();
        for fields in batch {
            let mut cmd = deadpool_redis::redis::cmd("XADD");
            cmd.arg(stream).arg("MAXLEN").arg("~").arg(maxlen).arg("*");
            for (name, value) in fields {
                cmd.arg(name).arg(value);
            }
            pipe.add_command(cmd);
        }

        let replies: Vec<RedisValue> = pipe.query_async(&mut conn).await?;
        let mut ids = Vec::with_capacity(replies.len());
        for reply in replies {
            match reply {
                RedisValue::BulkString(bytes) => {
                    ids.push(String::from_utf8_lossy(&bytes).into_owned());
                }
                other => {
                    return Err(BusError::Stream(format!(
                        "Unexpected XADD pipeline reply: {other:?}"
                    )));
                }
            }
        }

        tracing::debug!(stream, count = ids.len(), "Appended batch");
        Ok(ids)
    }
}
