//! Search-store client and document materialization

pub mod bulk;
pub mod document;
pub mod error;

pub use bulk::{BulkAction, SearchClient};
pub use error::SearchError;
