//! System-of-record reads (PostgreSQL)
//!
//! The indexer materializes search documents by reading read-model rows by
//! primary key. The pool is validated with a trivial `SELECT 1` before each
//! read; a failed check recreates the pool, and transient read errors get
//! one reconnect-and-retry before giving up.

pub mod error;
pub mod rows;

pub use error::StoreError;

use std::time::Duration;

use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::RwLock;

const MAX_CONNECTIONS: u32 = 8;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct StoreService {
    url: String,
    pool: RwLock<PgPool>,
}

impl StoreService {
    /// Connect and validate; fails when the store is unreachable (workers
    /// exit non-zero on startup in that case).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        if url.is_empty() {
            return Err(StoreError::Config("database URL is required".into()));
        }
        let pool = Self::make_pool(url).await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        tracing::debug!("Store connected");

        Ok(Self {
            url: url.to_string(),
            pool: RwLock::new(pool),
        })
    }

    async fn make_pool(url: &str) -> Result<PgPool, StoreError> {
        Ok(PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?)
    }

    /// `SELECT 1` probe; recreate the pool when it fails
    pub async fn ensure_healthy(&self) -> Result<(), StoreError> {
        let healthy = {
            let pool = self.pool.read().await;
            sqlx::query("SELECT 1").execute(&*pool).await.is_ok()
        };
        if healthy {
            return Ok(());
        }

        tracing::warn!("Store health check failed, recreating pool");
        let fresh = Self::make_pool(&self.url).await?;
        let old = {
            let mut pool = self.pool.write().await;
            std::mem::replace(&mut *pool, fresh)
        };
        old.close().await;
        Ok(())
    }

    /// Read one row by primary key, decoded into a JSON object. Returns
    /// `None` when the row does not exist. Transient errors get one
    /// reconnect-and-retry.
    pub async fn fetch_row(
        &self,
        table: &str,
        pk_column: &str,
        id: &str,
    ) -> Result<Option<Map<String, Value>>, StoreError> {
        self.ensure_healthy().await?;

        match self.fetch_once(table, pk_column, id).await {
            Err(e) if e.is_transient() => {
                tracing::warn!(table, id, error = %e, "Transient read error, reconnecting once");
                self.ensure_healthy().await?;
                self.fetch_once(table, pk_column, id).await
            }
            other => other,
        }
    }

    async fn fetch_once(
        &self,
        table: &str,
        pk_column: &str,
        id: &str,
    ) -> Result<Option<Map<String, Value>>, StoreError> {
        // Table and pk names come from the static index routing table, never
        // from message payloads.
        let query = format!("SELECT * FROM {table} WHERE {pk_column}::text = $1");
        let pool = self.pool.read().await;
        let row = sqlx::query(&query).bind(id).fetch_optional(&*pool).await?;
        row.map(|r| rows::row_to_json(&r)).transpose()
    }

    pub async fn close(&self) {
        self.pool.read().await.close().await;
        tracing::debug!("Store pool closed");
    }
}
