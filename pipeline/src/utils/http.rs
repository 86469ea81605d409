//! Process-wide HTTP client pool
//!
//! One lazily-initialized `reqwest` client shared by provider calls and
//! image downloads. Connection pooling is per-process; individual call
//! sites override the request timeout where a tighter bound applies.

use std::sync::OnceLock;
use std::time::Duration;

use crate::core::constants::PROVIDER_TIMEOUT_SECS;

static HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// The shared client (60 s default timeout, bounded idle pool)
pub fn http_client() -> &'static reqwest::Client {
    HTTP_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|e| {
                // Builder only fails on TLS backend misconfiguration.
                tracing::error!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_is_singleton() {
        let a = http_client() as *const _;
        let b = http_client() as *const _;
        assert_eq!(a, b);
    }
}
