use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counters describing what happened to values passing through a buffer
#[derive(Debug, Clone)]
pub struct BufferStats {
    /// Values accepted from the producer side
    received: Arc<AtomicU64>,
    /// Values handed to the consumer
    delivered: Arc<AtomicU64>,
    /// Buffered values evicted to make room for newer ones
    evicted: Arc<AtomicU64>,
    /// Incoming values discarded because the buffer was full
    dropped: Arc<AtomicU64>,
    /// Overflows reported under the raise-error policy
    overflows: Arc<AtomicU64>,
    start_time: Instant,
}

impl BufferStats {
    pub fn new() -> Self {
        Self {
            received: Arc::new(AtomicU64::new(0)),
            delivered: Arc::new(AtomicU64::new(0)),
            evicted: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            overflows: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn total_delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn total_evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn total_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn total_overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Delivered values per second since creation
    pub fn throughput_per_sec(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_delivered() as f64 / elapsed
        }
    }

    /// Get a snapshot of the current counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.total_received(),
            delivered: self.total_delivered(),
            evicted: self.total_evicted(),
            dropped: self.total_dropped(),
            overflows: self.total_overflows(),
            throughput_per_sec: self.throughput_per_sec(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for BufferStats {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of buffer counters at a point in time
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub received: u64,
    pub delivered: u64,
    pub evicted: u64,
    pub dropped: u64,
    pub overflows: u64,
    pub throughput_per_sec: f64,
    pub elapsed: Duration,
}

impl StatsSnapshot {
    /// Values lost to the overflow policy, whichever way they were lost
    pub fn lost(&self) -> u64 {
        self.evicted + self.dropped + self.overflows
    }

    /// Format counters as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "Received: {}, Delivered: {}, Evicted: {}, Dropped: {}, Overflows: {}, \
             Throughput: {:.2} msg/s, Elapsed: {:.2}s",
            self.received,
            self.delivered,
            self.evicted,
            self.dropped,
            self.overflows,
            self.throughput_per_sec,
            self.elapsed.as_secs_f64()
        )
    }
}
