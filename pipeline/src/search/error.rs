//! Search-store error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search store configuration error: {0}")]
    Config(String),

    #[error("Search store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Search store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Bulk body serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        let err = SearchError::Status {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Search store returned status 503: unavailable"
        );
    }
}
