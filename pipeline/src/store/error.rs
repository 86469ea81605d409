//! System-of-record error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store configuration error: {0}")]
    Config(String),

    #[error("Unsupported column type {type_name} in {column}")]
    UnsupportedColumn { column: String, type_name: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Connection-level failures worth one reconnect-and-retry
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_not_transient() {
        assert!(!StoreError::Config("missing url".into()).is_transient());
    }

    #[test]
    fn test_pool_timeout_transient() {
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
    }
}
