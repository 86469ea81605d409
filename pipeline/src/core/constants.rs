// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display)
pub const APP_NAME: &str = "Lumen";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "lumen";

// =============================================================================
// Environment Variables - Logging
// =============================================================================

/// Environment variable for log level/filter (falls back to RUST_LOG)
pub const ENV_LOG: &str = "LUMEN_LOG";

// =============================================================================
// Environment Variables - Bus
// =============================================================================

/// Redis connection URL for the stream bus
pub const ENV_REDIS_URL: &str = "REDIS_URL";

/// Default bus address when REDIS_URL is unset
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

// =============================================================================
// Environment Variables - Health
// =============================================================================

/// Port for the worker health/metrics HTTP server
pub const ENV_HEALTH_PORT: &str = "HEALTH_PORT";

/// Default health server port
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

// =============================================================================
// Environment Variables - Providers
// =============================================================================

/// Provider credential (may also be delivered as a file-based secret)
pub const ENV_HF_API_TOKEN: &str = "HF_API_TOKEN";

/// Default provider endpoint, used when no per-task override is set
pub const ENV_HF_API_URL: &str = "HF_API_URL";

/// Global platform selector (per-task `{TASK}_PLATFORM` takes precedence)
pub const ENV_AI_PLATFORM: &str = "AI_PLATFORM";

/// Default provider platform
pub const DEFAULT_PLATFORM: &str = "huggingface";

/// Candidate scene labels override (comma list)
pub const ENV_SCENE_LABELS: &str = "SCENE_LABELS";

// =============================================================================
// Environment Variables - Retry
// =============================================================================

pub const ENV_MAX_RETRIES: &str = "MAX_RETRIES";
pub const ENV_INITIAL_RETRY_DELAY: &str = "INITIAL_RETRY_DELAY";
pub const ENV_MAX_RETRY_DELAY: &str = "MAX_RETRY_DELAY";
pub const ENV_BACKOFF_MULTIPLIER: &str = "BACKOFF_MULTIPLIER";

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_RETRY_DELAY_SECS: f64 = 1.0;
pub const DEFAULT_MAX_RETRY_DELAY_SECS: f64 = 30.0;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

// =============================================================================
// Environment Variables - Image fetching / SSRF
// =============================================================================

/// Comma-separated hostname allow-list for image downloads
pub const ENV_ALLOWED_IMAGE_DOMAINS: &str = "ALLOWED_IMAGE_DOMAINS";

/// Default allow-list applied when ALLOWED_IMAGE_DOMAINS is unset
pub const DEFAULT_ALLOWED_IMAGE_DOMAINS: &str = "res.cloudinary.com,res-console.cloudinary.com";

/// Toggle for private-address resolution checks
pub const ENV_SSRF_CHECK_ENABLED: &str = "SSRF_CHECK_ENABLED";

// =============================================================================
// Environment Variables - Faces
// =============================================================================

/// Fixed face-embedding dimension; producers pad or truncate to this
pub const ENV_EMBEDDING_DIM: &str = "EMBEDDING_DIM";

pub const DEFAULT_EMBEDDING_DIM: usize = 1024;

// =============================================================================
// Environment Variables - Aggregator
// =============================================================================

pub const ENV_AGGREGATION_WAIT_SECONDS: &str = "AGGREGATION_WAIT_SECONDS";
pub const ENV_AGGREGATION_POLL_INTERVAL: &str = "AGGREGATION_POLL_INTERVAL";

pub const DEFAULT_AGGREGATION_WAIT_SECS: f64 = 6.0;
pub const DEFAULT_AGGREGATION_POLL_SECS: f64 = 0.5;

// =============================================================================
// Environment Variables - Indexer
// =============================================================================

/// Search store base URL
pub const ENV_SEARCH_URL: &str = "ES_HOST";

pub const DEFAULT_SEARCH_URL: &str = "http://elasticsearch:9200";

/// PostgreSQL system-of-record URL
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

pub const ENV_SYNC_BATCH_SIZE: &str = "ES_SYNC_BATCH_SIZE";
pub const ENV_SYNC_BATCH_TIMEOUT: &str = "ES_SYNC_BATCH_TIMEOUT";

pub const DEFAULT_SYNC_BATCH_SIZE: usize = 50;
pub const DEFAULT_SYNC_BATCH_TIMEOUT_SECS: f64 = 2.0;

/// Base delay for per-document search-store retries
pub const SEARCH_RETRY_DELAY_SECS: u64 = 2;

/// Maximum per-document search-store write attempts
pub const SEARCH_MAX_RETRIES: u32 = 3;

// =============================================================================
// Environment Variables - DLQ processor
// =============================================================================

pub const ENV_DLQ_AUTO_RETRY: &str = "DLQ_AUTO_RETRY";

// =============================================================================
// Streams
// =============================================================================

/// Image jobs written by the upload gateway (and DLQ retries)
pub const STREAM_IMAGE_JOBS: &str = "post-image-processing";

/// Per-image results from moderation/tagging/scene/captioning
pub const STREAM_INSIGHTS: &str = "ml-insights-results";

/// Per-image face-detection results
pub const STREAM_FACES: &str = "face-detection-results";

/// Aggregation triggers from the orchestrator
pub const STREAM_AGGREGATION_TRIGGER: &str = "post-aggregation-trigger";

/// Post-level enriched records
pub const STREAM_ENRICHED: &str = "post-insights-enriched";

/// Search-store sync events from downstream persistence
pub const STREAM_SYNC_QUEUE: &str = "es-sync-queue";

/// Dead-letter stream shared by every worker
pub const STREAM_DLQ: &str = "ai-processing-dlq";

// =============================================================================
// Bus Defaults
// =============================================================================

/// Approximate per-stream retention applied on every append
pub const DEFAULT_STREAM_MAXLEN: u64 = 10_000;

/// Block timeout per consume iteration, milliseconds
pub const CONSUME_BLOCK_MS: u64 = 5_000;

/// Entries read per consume iteration
pub const CONSUME_COUNT: usize = 10;

/// Interval between pending-list scans, seconds
pub const PENDING_CHECK_INTERVAL_SECS: u64 = 60;

/// Idle threshold before a pending entry becomes reclaimable, milliseconds
pub const PENDING_IDLE_MS: u64 = 300_000;

/// Delivery count at which a reclaimable entry is routed to the DLQ instead
pub const MAX_CLAIM_FAILURES: u64 = 3;

// =============================================================================
// Wire format
// =============================================================================

/// Schema version stamped on every produced entry
pub const MESSAGE_VERSION: &str = "1";

// =============================================================================
// Timeouts
// =============================================================================

/// Provider HTTP request timeout, seconds
pub const PROVIDER_TIMEOUT_SECS: u64 = 60;

/// Image download timeout, seconds
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Health evaluation thresholds
// =============================================================================

/// Unhealthy when nothing has been processed for this long (seconds)
pub const HEALTH_MAX_IDLE_SECS: i64 = 600;

/// Unhealthy when the success rate drops below this percentage
pub const HEALTH_MIN_SUCCESS_RATE: f64 = 50.0;

/// Unhealthy when average latency exceeds this many seconds
pub const HEALTH_MAX_AVG_LATENCY_SECS: f64 = 60.0;

/// Cadence of the periodic health log task, seconds
pub const HEALTH_LOG_INTERVAL_SECS: u64 = 300;
