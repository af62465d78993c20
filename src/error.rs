use std::sync::Arc;

use thiserror::Error;

/// Result type for event stream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by streams, queues and the backpressure combinator
///
/// Errors are cheap to clone so a single terminal error can resolve every
/// consumer waiting on the same queue.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Invalid constructor or configuration argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A bounded buffer using the raise-error policy overflowed
    #[error("Buffer overflow: capacity limit of {limit} exceeded")]
    Overflow { limit: usize },

    /// The consumer or an external signal cancelled the sequence
    #[error("Operation cancelled")]
    Cancelled,

    /// The queue has already ended and accepts no more values
    #[error("Queue has ended")]
    Closed,

    /// A single-subscriber stream was subscribed a second time
    #[error("Stream accepts a single subscriber")]
    AlreadySubscribed,

    /// A timer or pump task was requested outside of a tokio runtime
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// The upstream producer failed
    #[error("Producer failed: {0}")]
    Producer(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap an arbitrary producer error
    pub fn producer(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Producer(Arc::from(err.into()))
    }

    /// Whether this error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this error reports a raise-error buffer overflow
    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::Overflow { .. })
    }
}
