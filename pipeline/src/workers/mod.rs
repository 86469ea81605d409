//! Worker processes
//!
//! Five analysis workers share the generic skeleton in [`analysis`] with the
//! task table in [`tasks`]; the aggregator, indexer, and DLQ processor have
//! their own loops built on the same [`runtime`].

pub mod aggregator;
pub mod analysis;
pub mod dlq;
pub mod indexer;
pub mod runtime;
pub mod tasks;

pub use aggregator::run_aggregator;
pub use analysis::run_analysis_worker;
pub use dlq::run_dlq_processor;
pub use indexer::run_indexer;
pub use runtime::{WorkerError, WorkerRuntime};
