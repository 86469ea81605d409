//! Bus error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Bus configuration error: {0}")]
    Config(String),

    #[error("Bus connection error: {0}")]
    Connection(String),

    #[error("Stream operation failed: {0}")]
    Stream(String),

    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    #[error("Entry decode error: {0}")]
    Decode(String),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
}
