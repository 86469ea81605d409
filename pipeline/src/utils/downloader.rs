//! Image downloader shared by all analysis workers
//!
//! Downloads are bounded by `DOWNLOAD_TIMEOUT_SECS` per request and retried
//! on transport errors and upstream 5xx with the worker retry schedule.
//! Client errors (4xx) are permanent and returned without retrying.

use std::time::Duration;

use thiserror::Error;

use super::http::http_client;
use super::retry;
use crate::core::config::RetryConfig;
use crate::core::constants::DOWNLOAD_TIMEOUT_SECS;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Download request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Download failed with status {status}")]
    Status { status: u16 },
}

impl DownloadError {
    /// Transport errors, timeouts, and 5xx are retryable; 4xx is permanent
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status } => *status >= 500 || *status == 429,
        }
    }
}

async fn fetch_once(url: &str) -> Result<Vec<u8>, DownloadError> {
    let response = http_client()
        .get(url)
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status {
            status: status.as_u16(),
        });
    }

    Ok(response.bytes().await?.to_vec())
}

/// Download image bytes with bounded retry.
///
/// On failure, returns the error plus the number of attempts made.
pub async fn download_image(
    url: &str,
    schedule: &RetryConfig,
    correlation_id: &str,
) -> Result<Vec<u8>, (DownloadError, u32)> {
    let result = retry::retry_with_backoff_if(
        schedule,
        "image download",
        DownloadError::is_retryable,
        |_| fetch_once(url),
    )
    .await;

    match result {
        Ok((bytes, attempts)) => {
            tracing::info!(
                url = %truncate(url),
                size_bytes = bytes.len(),
                attempts,
                correlation_id,
                "Image downloaded"
            );
            Ok(bytes)
        }
        Err((e, attempts)) => {
            tracing::error!(
                url = %truncate(url),
                attempts,
                correlation_id,
                error = %e,
                "Image download failed"
            );
            Err((e, attempts))
        }
    }
}

/// First 100 characters of the URL for log lines; slices on a char
/// boundary so multi-byte URLs cannot panic.
fn truncate(url: &str) -> &str {
    match url.char_indices().nth(100) {
        Some((i, _)) => &url[..i],
        None => url,
    }
}
