//! Provider error types

use thiserror::Error;

use crate::utils::circuit::CircuitOpen;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider configuration error: {0}")]
    Config(String),

    #[error("Provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned status {status}")]
    Status { status: u16 },

    #[error("Unusable provider response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),
}

impl ProviderError {
    /// Transport errors, 5xx/429, and a fast-failing circuit are retryable;
    /// other 4xx and malformed responses are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status } => *status >= 500 || *status == 429,
            Self::CircuitOpen(_) => true,
            Self::Config(_) | Self::InvalidResponse(_) => false,
        }
    }

    /// Short machine-readable name for DLQ envelopes
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Http(_) => "HTTPError",
            Self::Status { .. } => "HTTPError",
            Self::InvalidResponse(_) => "InvalidResponse",
            Self::CircuitOpen(_) => "CircuitOpen",
        }
    }
}
