//! Configuration for the buffering consumers and the batching operators.
//!
//! Both configs deserialize with serde using camelCase keys
//! (`capacityLimit`, `overflowPolicy`, `maxSize`, `minSize`, `maxWaitMs`,
//! `emitPartialOnEnd`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::buffer::OverflowPolicy;
use crate::error::{Error, Result};

/// Buffering options for [`PullQueue`](crate::PullQueue) and
/// [`Backpressure`](crate::Backpressure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BackpressureConfig {
    /// Maximum buffered elements; 0 means unbounded
    #[serde(default)]
    pub capacity_limit: usize,

    /// What to do when a bounded buffer is full
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// External signal that cancels the consumer
    #[serde(skip)]
    pub cancellation: Option<CancellationToken>,
}

impl BackpressureConfig {
    /// Unbounded buffer
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Buffer holding at most `capacity_limit` elements
    pub fn bounded(capacity_limit: usize, overflow_policy: OverflowPolicy) -> Self {
        Self {
            capacity_limit,
            overflow_policy,
            cancellation: None,
        }
    }

    /// Attach an external cancellation signal
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn is_bounded(&self) -> bool {
        self.capacity_limit > 0
    }

    /// Check the options before building a consumer
    pub fn validate(&self) -> Result<()> {
        if self
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return Err(Error::InvalidArgument(
                "cancellation signal already fired".into(),
            ));
        }
        Ok(())
    }
}

/// Grouping options for [`EventStream::batch`](crate::EventStream::batch)
///
/// A batch is flushed when it reaches `max_size` elements or when `max_wait`
/// has elapsed since its first element, whichever comes first. A timed flush
/// is held back until at least `min_size` elements are buffered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BatchConfig {
    pub max_size: usize,

    #[serde(default = "default_min_size")]
    pub min_size: usize,

    #[serde(default, rename = "maxWaitMs", with = "millis")]
    pub max_wait: Option<Duration>,

    #[serde(default = "default_emit_partial")]
    pub emit_partial_on_end: bool,
}

fn default_min_size() -> usize {
    1
}

fn default_emit_partial() -> bool {
    true
}

impl BatchConfig {
    /// Size-bounded batches of `max_size` elements
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            min_size: default_min_size(),
            max_wait: None,
            emit_partial_on_end: default_emit_partial(),
        }
    }

    /// Time-bounded batches with no size cap
    pub fn timed(max_wait: Duration) -> Self {
        Self::new(usize::MAX).max_wait(max_wait)
    }

    pub fn min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn emit_partial_on_end(mut self, emit: bool) -> Self {
        self.emit_partial_on_end = emit;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::InvalidArgument("maxSize must be positive".into()));
        }
        if self.min_size == 0 {
            return Err(Error::InvalidArgument("minSize must be positive".into()));
        }
        if self.min_size > self.max_size {
            return Err(Error::InvalidArgument(format!(
                "minSize ({}) exceeds maxSize ({})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// Serde adapter storing `Option<Duration>` as whole milliseconds
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
