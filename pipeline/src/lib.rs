//! Media enrichment pipeline
//!
//! A fleet of stream-processing workers over a Redis Streams log bus:
//! uploaded images are analyzed by AI workers (moderation, tagging, scene
//! recognition, captioning, face detection), per-image results fan in to a
//! post-level aggregator, and enriched records are materialized into the
//! search store by the indexing worker. Delivery is at-least-once with
//! idempotent sinks; poison entries land on a dead-letter stream with its
//! own processor.

pub mod app;
pub mod bus;
pub mod core;
pub mod health;
pub mod metrics;
pub mod providers;
pub mod schemas;
pub mod search;
pub mod store;
pub mod utils;
pub mod workers;
