//! Worker configuration loaded from the environment
//!
//! Every worker process shares one [`WorkerConfig`]. Values come from
//! environment variables (`.env` honored via dotenvy at startup) with the
//! defaults defined in [`crate::core::constants`]. Parsing is forgiving:
//! malformed numeric values fall back to defaults with a warning rather than
//! aborting startup.

use std::time::Duration;

use crate::core::constants::*;

/// Retry schedule for provider calls and image downloads
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_secs_f64(DEFAULT_INITIAL_RETRY_DELAY_SECS),
            max_delay: Duration::from_secs_f64(DEFAULT_MAX_RETRY_DELAY_SECS),
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

/// SSRF guard settings for image downloads
#[derive(Debug, Clone)]
pub struct SsrfConfig {
    /// Lowercased hostname allow-list; empty disables the allow-list check
    pub allowed_domains: Vec<String>,
    /// When false, private-address resolution checks are skipped
    pub check_enabled: bool,
}

impl Default for SsrfConfig {
    fn default() -> Self {
        Self {
            allowed_domains: split_domains(DEFAULT_ALLOWED_IMAGE_DOMAINS),
            check_enabled: true,
        }
    }
}

/// Fan-in window for the post aggregator
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Deadline for completeness before emitting with warnings
    pub wait: Duration,
    /// Sleep between completeness polls
    pub poll_interval: Duration,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs_f64(DEFAULT_AGGREGATION_WAIT_SECS),
            poll_interval: Duration::from_secs_f64(DEFAULT_AGGREGATION_POLL_SECS),
        }
    }
}

/// Indexing worker settings
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Search store base URL
    pub search_url: String,
    /// System-of-record connection URL (required for the indexer)
    pub database_url: Option<String>,
    /// Flush when the buffer reaches this many actions
    pub batch_size: usize,
    /// Flush when this much time has passed since the batch started
    pub batch_timeout: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            search_url: DEFAULT_SEARCH_URL.to_string(),
            database_url: None,
            batch_size: DEFAULT_SYNC_BATCH_SIZE,
            batch_timeout: Duration::from_secs_f64(DEFAULT_SYNC_BATCH_TIMEOUT_SECS),
        }
    }
}

/// Process-wide configuration shared by all worker types
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub health_port: u16,
    pub retry: RetryConfig,
    pub ssrf: SsrfConfig,
    pub embedding_dim: usize,
    pub aggregation: AggregationConfig,
    pub indexer: IndexerConfig,
    pub dlq_auto_retry: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            health_port: DEFAULT_HEALTH_PORT,
            retry: RetryConfig::default(),
            ssrf: SsrfConfig::default(),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            aggregation: AggregationConfig::default(),
            indexer: IndexerConfig::default(),
            dlq_auto_retry: false,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from the process environment
    pub fn load() -> Self {
        let retry = RetryConfig {
            max_retries: env_parse(ENV_MAX_RETRIES, DEFAULT_MAX_RETRIES),
            initial_delay: Duration::from_secs_f64(env_parse(
                ENV_INITIAL_RETRY_DELAY,
                DEFAULT_INITIAL_RETRY_DELAY_SECS,
            )),
            max_delay: Duration::from_secs_f64(env_parse(
                ENV_MAX_RETRY_DELAY,
                DEFAULT_MAX_RETRY_DELAY_SECS,
            )),
            backoff_multiplier: env_parse(ENV_BACKOFF_MULTIPLIER, DEFAULT_BACKOFF_MULTIPLIER),
        };

        let ssrf = SsrfConfig {
            allowed_domains: split_domains(
                &env_string(ENV_ALLOWED_IMAGE_DOMAINS, DEFAULT_ALLOWED_IMAGE_DOMAINS),
            ),
            check_enabled: env_bool(ENV_SSRF_CHECK_ENABLED, true),
        };

        let aggregation = AggregationConfig {
            wait: Duration::from_secs_f64(env_parse(
                ENV_AGGREGATION_WAIT_SECONDS,
                DEFAULT_AGGREGATION_WAIT_SECS,
            )),
            poll_interval: Duration::from_secs_f64(env_parse(
                ENV_AGGREGATION_POLL_INTERVAL,
                DEFAULT_AGGREGATION_POLL_SECS,
            )),
        };

        let indexer = IndexerConfig {
            search_url: env_string(ENV_SEARCH_URL, DEFAULT_SEARCH_URL),
            database_url: std::env::var(ENV_DATABASE_URL).ok().filter(|v| !v.is_empty()),
            batch_size: env_parse(ENV_SYNC_BATCH_SIZE, DEFAULT_SYNC_BATCH_SIZE),
            batch_timeout: Duration::from_secs_f64(env_parse(
                ENV_SYNC_BATCH_TIMEOUT,
                DEFAULT_SYNC_BATCH_TIMEOUT_SECS,
            )),
        };

        Self {
            redis_url: env_string(ENV_REDIS_URL, DEFAULT_REDIS_URL),
            health_port: env_parse(ENV_HEALTH_PORT, DEFAULT_HEALTH_PORT),
            retry,
            ssrf,
            embedding_dim: env_parse(ENV_EMBEDDING_DIM, DEFAULT_EMBEDDING_DIM),
            aggregation,
            indexer,
            dlq_auto_retry: env_bool(ENV_DLQ_AUTO_RETRY, false),
        }
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "Unparseable env value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

fn split_domains(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}
