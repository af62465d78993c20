//! Bounded buffering over a pull-based sequence.
//!
//! [`Backpressure`] drives its source from a background task, so a fast
//! producer never waits on a slow consumer. What happens once the buffer is
//! full is decided by the configured [`OverflowPolicy`].

use std::fmt;
use std::future::poll_fn;
use std::pin::{pin, Pin};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buffer::{OverflowPolicy, PushOutcome, RingBuffer};
use crate::config::BackpressureConfig;
use crate::error::{Error, Result};
use crate::stats::{BufferStats, StatsSnapshot};
use crate::stream::{EventStream, Subscription};

struct State<T> {
    buffer: RingBuffer<T>,
    /// Consumers waiting for the pump
    wakers: Vec<Waker>,
    /// The source is exhausted, failed or the combinator was cancelled
    finished: bool,
    /// Terminal error not yet reported
    error: Option<Error>,
}

impl<T> State<T> {
    /// Mark the sequence finished, returning the wakers to notify
    fn finish(&mut self, error: Option<Error>) -> Vec<Waker> {
        if !self.finished {
            self.finished = true;
            self.error = error;
        }
        std::mem::take(&mut self.wakers)
    }

    fn register(&mut self, waker: &Waker) {
        if !self.wakers.iter().any(|w| w.will_wake(waker)) {
            self.wakers.push(waker.clone());
        }
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    stats: BufferStats,
}

impl<T> Shared<T> {
    fn finish(&self, error: Option<Error>) -> Vec<Waker> {
        self.state.lock().finish(error)
    }

    fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    fn accept(&self, value: T) -> Vec<Waker> {
        let mut state = self.state.lock();
        if state.finished {
            return Vec::new();
        }
        self.stats.record_received();

        match state.buffer.push(value) {
            PushOutcome::Stored => {}
            PushOutcome::Evicted(_) => self.stats.record_evicted(),
            PushOutcome::Dropped(_) => self.stats.record_dropped(),
            PushOutcome::Overflow(_) => {
                self.stats.record_overflow();
                let limit = state.buffer.limit();
                warn!(limit, buffered = state.buffer.len(), "backpressure buffer overflowed; stopping source");
                return state.finish(Some(Error::Overflow { limit }));
            }
        }
        std::mem::take(&mut state.wakers)
    }

    fn cancelled_externally(&self) -> Vec<Waker> {
        let mut state = self.state.lock();
        if state.finished {
            return Vec::new();
        }
        let discarded = state.buffer.len();
        state.buffer.clear();
        debug!(discarded, "backpressure cancelled by signal");
        state.finish(Some(Error::Cancelled))
    }
}

async fn pump<S, T>(source: S, shared: Arc<Shared<T>>, token: CancellationToken)
where
    S: Stream<Item = Result<T>>,
{
    let mut source = pin!(source);
    loop {
        let wakers = tokio::select! {
            biased;
            _ = token.cancelled() => {
                shared.cancelled_externally().into_iter().for_each(Waker::wake);
                return;
            }
            item = source.next() => match item {
                Some(Ok(value)) => shared.accept(value),
                Some(Err(err)) => {
                    debug!(error = %err, "backpressure source failed");
                    shared.finish(Some(err))
                }
                None => shared.finish(None),
            },
        };

        let done = shared.is_finished();
        wakers.into_iter().for_each(Waker::wake);
        if done {
            return;
        }
    }
}

/// Buffered, cancellable consumer view over a pull-based source
///
/// Created with [`Backpressure::new`] inside a tokio runtime; the source is
/// polled immediately. Dropping the combinator cancels it.
pub struct Backpressure<T> {
    shared: Arc<Shared<T>>,
    /// Child of the configured cancellation token, if any
    token: CancellationToken,
    pump: AbortHandle,
    /// Released on cancel, e.g. the queue feeding the source
    upstream: Subscription,
}

impl<T> fmt::Debug for Backpressure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Backpressure")
            .field("buffered", &state.buffer.len())
            .field("limit", &state.buffer.limit())
            .field("policy", &state.buffer.policy())
            .field("finished", &state.finished)
            .finish()
    }
}

impl<T: Send + 'static> Backpressure<T> {
    /// Start pulling `source` into a buffer shaped by `config`
    pub fn new<S>(source: S, config: BackpressureConfig) -> Result<Self>
    where
        S: Stream<Item = Result<T>> + Send + 'static,
    {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| Error::NoRuntime(e.to_string()))?;

        let token = match &config.cancellation {
            Some(external) => external.child_token(),
            None => CancellationToken::new(),
        };
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                buffer: RingBuffer::new(config.capacity_limit, config.overflow_policy),
                wakers: Vec::new(),
                finished: false,
                error: None,
            }),
            stats: BufferStats::new(),
        });

        let task = runtime.spawn(pump(source, Arc::clone(&shared), token.clone()));
        Ok(Self {
            shared,
            token,
            pump: task.abort_handle(),
            upstream: Subscription::empty(),
        })
    }
}

impl<T> Backpressure<T> {
    fn with_upstream(mut self, upstream: Subscription) -> Self {
        self.upstream = upstream;
        self
    }

    fn poll_item(&self, cx: &mut Context<'_>) -> Poll<Option<Result<T>>> {
        let mut state = self.shared.state.lock();
        if let Some(value) = state.buffer.pop() {
            self.shared.stats.record_delivered();
            return Poll::Ready(Some(Ok(value)));
        }
        if state.finished {
            return Poll::Ready(state.error.take().map(Err));
        }
        state.register(cx.waker());
        Poll::Pending
    }

    /// Await the next buffered value
    ///
    /// `Ok(None)` once the source has ended and the buffer drained, or after
    /// [`cancel`](Self::cancel). A source error, an overflow under the
    /// raise-error policy, or [`Error::Cancelled`] from the configured
    /// cancellation token is returned once, after which the sequence is over.
    pub async fn next(&self) -> Result<Option<T>> {
        poll_fn(|cx| self.poll_item(cx)).await.transpose()
    }

    /// Stop pulling and release the buffer; safe to call repeatedly
    pub fn cancel(&self) {
        let wakers = {
            let mut state = self.shared.state.lock();
            if !state.finished {
                debug!(discarded = state.buffer.len(), "backpressure cancelled");
            }
            state.buffer.clear();
            state.error = None;
            state.finish(None)
        };
        self.token.cancel();
        self.pump.abort();
        self.upstream.unsubscribe();
        wakers.into_iter().for_each(Waker::wake);
    }

    /// Values waiting to be consumed
    pub fn len(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots currently allocated by the buffer
    pub fn capacity(&self) -> usize {
        self.shared.state.lock().buffer.capacity()
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.shared.state.lock().buffer.policy()
    }

    /// True once the source is done; buffered values may remain
    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl<T> Stream for Backpressure<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_item(cx)
    }
}

impl<T> Drop for Backpressure<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T: Clone + Send + 'static> EventStream<T> {
    /// Consume this stream through a [`Backpressure`] buffer
    ///
    /// Values are bridged by an unbounded [`PullQueue`](crate::PullQueue)
    /// that the combinator drains continuously; `config` governs the
    /// combinator's own buffer. Cancelling the combinator unsubscribes from
    /// this stream.
    pub fn backpressure(&self, config: BackpressureConfig) -> Result<Backpressure<T>> {
        config.validate()?;
        let queue = self.pull(BackpressureConfig::unbounded())?;
        let handle = queue.clone();
        let combinator = Backpressure::new(queue.into_stream(), config)?;
        Ok(combinator.with_upstream(Subscription::new(move || handle.cancel())))
    }
}
