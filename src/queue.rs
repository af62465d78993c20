//! Push-to-pull bridge.
//!
//! A [`PullQueue`] lets a producer `enqueue` values at its own pace while a
//! consumer awaits them one at a time with [`PullQueue::next`]. A value
//! produced while a consumer is waiting is handed over directly; otherwise it
//! is buffered according to the queue's [`BackpressureConfig`].

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buffer::{OverflowPolicy, PushOutcome, RingBuffer};
use crate::config::BackpressureConfig;
use crate::error::{Error, Result};
use crate::stats::{BufferStats, StatsSnapshot};
use crate::stream::{EventStream, Notification, Subscription};

type Request<T> = oneshot::Sender<Result<Option<T>>>;

struct QueueState<T> {
    buffer: RingBuffer<T>,
    /// Consumers waiting for a value, oldest first
    pending: VecDeque<Request<T>>,
    ended: bool,
    /// Terminal error not yet reported to a consumer
    error: Option<Error>,
    /// Released when the queue ends, e.g. the link to a source stream
    on_end: Option<Subscription>,
}

impl<T> QueueState<T> {
    fn take_terminal(&mut self) -> Result<Option<T>> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}

struct Shared<T> {
    state: Mutex<QueueState<T>>,
    cancellation: Option<CancellationToken>,
    /// Fired once the queue ends or is dropped; stops the cancellation watcher
    closed: CancellationToken,
    stats: BufferStats,
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// FIFO adapter turning pushed values into an awaitable sequence
///
/// Clones share the same queue, so one clone can be handed to the producer
/// and another kept by the consumer.
pub struct PullQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for PullQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for PullQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("PullQueue")
            .field("buffered", &state.buffer.len())
            .field("pending", &state.pending.len())
            .field("ended", &state.ended)
            .finish()
    }
}

impl<T> Default for PullQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PullQueue<T> {
    /// Create an unbounded queue
    pub fn new() -> Self {
        Self::from_parts(0, OverflowPolicy::default(), None)
    }

    fn from_parts(
        limit: usize,
        policy: OverflowPolicy,
        cancellation: Option<CancellationToken>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    buffer: RingBuffer::new(limit, policy),
                    pending: VecDeque::new(),
                    ended: false,
                    error: None,
                    on_end: None,
                }),
                cancellation,
                closed: CancellationToken::new(),
                stats: BufferStats::new(),
            }),
        }
    }

    /// Offer a value to the consumer side
    ///
    /// Fails with [`Error::Closed`] once the queue has ended. Under the
    /// raise-error policy a full queue ends with [`Error::Overflow`]; the
    /// consumer sees that error after draining what is already buffered.
    pub fn enqueue(&self, value: T) -> Result<()> {
        if self.cancellation_fired() {
            self.cancel();
            return Err(Error::Closed);
        }

        let mut state = self.shared.state.lock();
        if state.ended {
            return Err(Error::Closed);
        }
        self.shared.stats.record_received();

        let mut value = value;
        while let Some(request) = state.pending.pop_front() {
            match request.send(Ok(Some(value))) {
                Ok(()) => {
                    self.shared.stats.record_delivered();
                    return Ok(());
                }
                // The waiting consumer went away; try the next one
                Err(Ok(Some(unsent))) => value = unsent,
                Err(_) => return Ok(()),
            }
        }

        match state.buffer.push(value) {
            PushOutcome::Stored => Ok(()),
            PushOutcome::Evicted(_) => {
                self.shared.stats.record_evicted();
                Ok(())
            }
            PushOutcome::Dropped(_) => {
                self.shared.stats.record_dropped();
                Ok(())
            }
            PushOutcome::Overflow(_) => {
                self.shared.stats.record_overflow();
                let limit = state.buffer.limit();
                drop(state);
                warn!(limit, "pull queue overflowed; ending queue");
                self.finish(Some(Error::Overflow { limit }));
                Err(Error::Overflow { limit })
            }
        }
    }

    /// Await the next value
    ///
    /// Returns `Ok(None)` once the queue has ended and drained. A terminal
    /// error is reported exactly once, to every consumer waiting at the time
    /// or to the first one to ask afterwards.
    pub async fn next(&self) -> Result<Option<T>> {
        if self.cancellation_fired() {
            self.cancel();
        }

        let receiver = {
            let mut state = self.shared.state.lock();
            if let Some(value) = state.buffer.pop() {
                self.shared.stats.record_delivered();
                return Ok(Some(value));
            }
            if state.ended {
                return state.take_terminal();
            }
            let (request, receiver) = oneshot::channel();
            state.pending.push_back(request);
            receiver
        };

        match &self.shared.cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    delivered = receiver => delivered.unwrap_or(Ok(None)),
                    _ = token.cancelled() => {
                        self.cancel();
                        Err(Error::Cancelled)
                    }
                }
            }
            None => receiver.await.unwrap_or(Ok(None)),
        }
    }

    /// Like [`next`](Self::next) but never waits
    pub fn try_next(&self) -> Result<Option<T>> {
        let mut state = self.shared.state.lock();
        match state.buffer.pop() {
            Some(value) => {
                self.shared.stats.record_delivered();
                Ok(Some(value))
            }
            None if state.ended => state.take_terminal(),
            None => Ok(None),
        }
    }

    /// End normally; buffered values are still delivered
    pub fn end(&self) {
        self.finish(None);
    }

    /// End with an error, reported after buffered values drain
    pub fn fail(&self, err: Error) {
        self.finish(Some(err));
    }

    /// End with [`Error::Cancelled`], discarding buffered values
    ///
    /// Consumers waiting in `next` are rejected with the cancellation error.
    pub fn cancel(&self) {
        let discarded = {
            let mut state = self.shared.state.lock();
            let discarded = state.buffer.len();
            state.buffer.clear();
            discarded
        };
        if discarded > 0 {
            debug!(discarded, "pull queue cancelled with buffered values");
        }
        self.finish(Some(Error::Cancelled));
    }

    fn finish(&self, error: Option<Error>) {
        let on_end = {
            let mut state = self.shared.state.lock();
            if state.ended {
                return;
            }
            state.ended = true;
            let pending = std::mem::take(&mut state.pending);
            // Pending consumers imply an empty buffer, so a live one receives
            // the terminal outcome now instead of a later caller
            let mut delivered = false;
            for request in pending {
                let outcome = match &error {
                    Some(err) => Err(err.clone()),
                    None => Ok(None),
                };
                delivered |= request.send(outcome).is_ok();
            }
            if !delivered {
                state.error = error;
            }
            state.on_end.take()
        };
        self.shared.closed.cancel();

        if let Some(on_end) = on_end {
            on_end.unsubscribe();
        }
    }

    /// Release `subscription` when the queue ends (immediately if it has)
    pub fn release_on_end(&self, subscription: Subscription) {
        let mut state = self.shared.state.lock();
        if state.ended {
            drop(state);
            subscription.unsubscribe();
        } else {
            state.on_end = Some(subscription);
        }
    }

    fn cancellation_fired(&self) -> bool {
        self.shared
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    pub fn is_ended(&self) -> bool {
        self.shared.state.lock().ended
    }

    /// Buffered values not yet taken
    pub fn len(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumers currently waiting in `next`
    pub fn waiting(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl<T: Send + 'static> PullQueue<T> {
    /// Create a queue with the given buffering options
    ///
    /// With a cancellation token and a tokio runtime available, a watcher
    /// task cancels the queue as soon as the token fires. Without a runtime
    /// the token is observed on the next `enqueue` or `next`.
    pub fn with_config(config: BackpressureConfig) -> Result<Self> {
        config.validate()?;
        let queue = Self::from_parts(
            config.capacity_limit,
            config.overflow_policy,
            config.cancellation,
        );
        queue.watch_cancellation();
        Ok(queue)
    }

    fn watch_cancellation(&self) {
        let Some(token) = self.shared.cancellation.clone() else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            debug!("no runtime for the cancellation watcher; checking the token lazily");
            return;
        };
        let closed = self.shared.closed.clone();
        let shared = Arc::downgrade(&self.shared);
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    if let Some(shared) = shared.upgrade() {
                        PullQueue { shared }.cancel();
                    }
                }
                _ = closed.cancelled() => {}
            }
        });
    }

    /// Consume the queue as a [`Stream`] of results
    ///
    /// The stream ends after the terminal outcome. Dropping it cancels the
    /// queue.
    pub fn into_stream(self) -> QueueStream<T> {
        let inner = stream::unfold(self.clone(), |queue| async move {
            match queue.next().await {
                Ok(Some(value)) => Some((Ok(value), queue)),
                Ok(None) => None,
                Err(err) => Some((Err(err), queue)),
            }
        })
        .boxed();
        QueueStream { inner, queue: self }
    }
}

/// [`Stream`] view over a [`PullQueue`]; see [`PullQueue::into_stream`]
pub struct QueueStream<T> {
    inner: BoxStream<'static, Result<T>>,
    queue: PullQueue<T>,
}

impl<T> Stream for QueueStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<T> Drop for QueueStream<T> {
    fn drop(&mut self) {
        self.queue.cancel();
    }
}

impl<T: Clone + Send + 'static> EventStream<T> {
    /// Bridge this stream into a [`PullQueue`]
    ///
    /// Values emitted from now on are enqueued; completion or failure ends the
    /// queue. Ending or cancelling the queue unsubscribes from the stream.
    pub fn pull(&self, config: BackpressureConfig) -> Result<PullQueue<T>> {
        let queue = PullQueue::with_config(config)?;
        let producer = queue.clone();
        let subscription = self.subscribe(move |notification| match notification {
            Notification::Next(value) => {
                if let Err(err) = producer.enqueue(value) {
                    debug!(error = %err, "value not enqueued");
                }
            }
            Notification::Complete => producer.end(),
            Notification::Error(err) => producer.fail(err),
        });
        queue.release_on_end(subscription);
        Ok(queue)
    }
}
