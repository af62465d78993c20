use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::timer::Timer;
use crate::config::BatchConfig;
use crate::error::{Error, Result};
use crate::stream::{EventStream, Notification, Subscription};

struct Debounced<T> {
    pending: Option<T>,
    timer: Timer,
}

impl<T> Debounced<T> {
    /// Shared teardown for error, unsubscribe and terminal paths
    fn clear(&mut self) {
        self.timer.cancel();
        self.pending = None;
    }
}

/// One activation of a debounced stream
struct Debouncer<T> {
    state: Arc<Mutex<Debounced<T>>>,
    out: EventStream<T>,
    wait: Duration,
}

impl<T> Clone for Debouncer<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            out: self.out.clone(),
            wait: self.wait,
        }
    }
}

impl<T: Clone + Send + 'static> Debouncer<T> {
    fn push(&self, value: T) {
        let mut state = self.state.lock();
        state.pending = Some(value);
        let worker = self.clone();
        state.timer.arm(self.wait, move |generation| worker.fire(generation));
    }

    fn fire(&self, generation: u64) {
        let value = {
            let mut state = self.state.lock();
            if !state.timer.fired(generation) {
                return;
            }
            state.pending.take()
        };
        if let Some(value) = value {
            self.out.emit(value);
        }
    }

    fn finish(&self) {
        let value = {
            let mut state = self.state.lock();
            state.timer.cancel();
            state.pending.take()
        };
        if let Some(value) = value {
            debug!("flushing debounced value on completion");
            self.out.emit(value);
        }
        self.out.complete();
    }

    fn fail(&self, err: Error) {
        self.state.lock().clear();
        self.out.fail(err);
    }
}

/// Accumulated values of one batch activation
struct Pending<T> {
    items: Vec<T>,
    timer: Timer,
}

impl<T> Pending<T> {
    fn clear(&mut self) {
        self.timer.cancel();
        self.items.clear();
    }
}

struct Batcher<T> {
    state: Arc<Mutex<Pending<T>>>,
    out: EventStream<Vec<T>>,
    config: Arc<BatchConfig>,
}

impl<T> Clone for Batcher<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            out: self.out.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<T: Clone + Send + 'static> Batcher<T> {
    fn push(&self, value: T) {
        let flushed = {
            let mut state = self.state.lock();
            state.items.push(value);

            if state.items.len() >= self.config.max_size {
                state.timer.cancel();
                Some(std::mem::take(&mut state.items))
            } else {
                if state.items.len() == 1 {
                    self.arm(&mut state);
                }
                None
            }
        };
        if let Some(batch) = flushed {
            self.out.emit(batch);
        }
    }

    fn arm(&self, state: &mut Pending<T>) {
        if let Some(max_wait) = self.config.max_wait {
            let worker = self.clone();
            state.timer.arm(max_wait, move |generation| worker.fire(generation));
        }
    }

    fn fire(&self, generation: u64) {
        let flushed = {
            let mut state = self.state.lock();
            if !state.timer.fired(generation) {
                return;
            }
            if state.items.len() >= self.config.min_size {
                Some(std::mem::take(&mut state.items))
            } else {
                if !state.items.is_empty() {
                    self.arm(&mut state);
                }
                None
            }
        };
        if let Some(batch) = flushed {
            self.out.emit(batch);
        }
    }

    fn finish(&self) {
        let partial = {
            let mut state = self.state.lock();
            state.timer.cancel();
            std::mem::take(&mut state.items)
        };
        if !partial.is_empty() {
            if self.config.emit_partial_on_end {
                self.out.emit(partial);
            } else {
                debug!(discarded = partial.len(), "dropping partial batch on completion");
            }
        }
        self.out.complete();
    }

    fn fail(&self, err: Error) {
        self.state.lock().clear();
        self.out.fail(err);
    }
}

impl<T: Clone + Send + 'static> EventStream<T> {
    /// Emit a value only after `wait` has passed without a newer one
    ///
    /// Upstream completion flushes a pending value before completing. Timers
    /// run on the tokio runtime current at activation; activating outside a
    /// runtime fails the stream with [`Error::NoRuntime`](crate::Error::NoRuntime).
    pub fn debounce(&self, wait: Duration) -> EventStream<T> {
        let source = self.clone();
        EventStream::derived(move |out| {
            let timer = match Timer::current() {
                Ok(timer) => timer,
                Err(err) => {
                    out.fail(err);
                    return Subscription::empty();
                }
            };
            let worker = Debouncer {
                state: Arc::new(Mutex::new(Debounced {
                    pending: None,
                    timer,
                })),
                out: out.clone(),
                wait,
            };

            let handler = worker.clone();
            let upstream = source.subscribe(move |notification| match notification {
                Notification::Next(value) => handler.push(value),
                Notification::Complete => handler.finish(),
                Notification::Error(err) => handler.fail(err),
            });

            Subscription::new(move || {
                worker.state.lock().clear();
                upstream.unsubscribe();
            })
        })
    }

    /// Group values into batches bounded by size and time
    pub fn batch(&self, config: BatchConfig) -> Result<EventStream<Vec<T>>> {
        config.validate()?;
        let source = self.clone();
        let config = Arc::new(config);

        Ok(EventStream::derived(move |out| {
            let timer = match Timer::current() {
                Ok(timer) => timer,
                Err(err) if config.max_wait.is_some() => {
                    out.fail(err);
                    return Subscription::empty();
                }
                // Size-only batching never arms the timer
                Err(_) => Timer::detached(),
            };
            let worker = Batcher {
                state: Arc::new(Mutex::new(Pending {
                    items: Vec::new(),
                    timer,
                })),
                out: out.clone(),
                config: Arc::clone(&config),
            };

            let handler = worker.clone();
            let upstream = source.subscribe(move |notification| match notification {
                Notification::Next(value) => handler.push(value),
                Notification::Complete => handler.finish(),
                Notification::Error(err) => handler.fail(err),
            });

            Subscription::new(move || {
                worker.state.lock().clear();
                upstream.unsubscribe();
            })
        }))
    }

    /// Batches of exactly `size` values, plus a final partial batch
    pub fn buffer_count(&self, size: usize) -> Result<EventStream<Vec<T>>> {
        self.batch(BatchConfig::new(size))
    }

    /// Batches of whatever arrived within `window` of the first value
    pub fn buffer_time(&self, window: Duration) -> Result<EventStream<Vec<T>>> {
        self.batch(BatchConfig::timed(window))
    }
}
