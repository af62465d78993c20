//! Composable push/pull event streams with explicit backpressure.
//!
//! Producers of any shape (callbacks, timers, sockets) emit into an
//! [`EventStream`]; operators derive new streams from it; consumers either
//! subscribe to notifications or pull values one at a time through a
//! [`PullQueue`] or a [`Backpressure`] buffer.
//!
//! # Features
//!
//! - Multicast streams with lazy, reference-counted upstream subscriptions
//! - Operators: map, filter, take, skip, merge, debounce, batch
//! - Push-to-pull bridging queue with cancellation
//! - Growable ring buffer with evict-oldest, drop-incoming or raise-error overflow
//! - Per-buffer statistics
//!
//! # Example
//!
//! ```ignore
//! use eventflow::{BackpressureConfig, EventStream, OverflowPolicy};
//!
//! let clicks = EventStream::new();
//! let doubled = clicks.map(|x: u32| x * 2).filter(|x| *x > 2);
//! let consumer = doubled.backpressure(BackpressureConfig::bounded(64, OverflowPolicy::EvictOldest))?;
//!
//! clicks.emit(1);
//! clicks.emit(2);
//! clicks.complete();
//!
//! while let Some(value) = consumer.next().await? {
//!     println!("{value}");
//! }
//! ```

pub mod backpressure;
pub mod buffer;
pub mod config;
pub mod error;
pub mod operator;
pub mod queue;
pub mod stats;
pub mod stream;

// Re-exports for convenience
pub use backpressure::Backpressure;
pub use buffer::{OverflowPolicy, PushOutcome, RingBuffer};
pub use config::{BackpressureConfig, BatchConfig};
pub use error::{Error, Result};
pub use operator::merge_all;
pub use queue::{PullQueue, QueueStream};
pub use stats::{BufferStats, StatsSnapshot};
pub use stream::{EventStream, Notification, Subscription};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
