//! The push-based stream primitive.
//!
//! An [`EventStream`] fans values out to every registered listener and ends
//! in exactly one terminal state. Derived streams built by the operators are
//! `EventStream`s too: they carry an activation closure that subscribes
//! upstream when the first listener arrives and hand back a [`Subscription`]
//! that is released when the last listener leaves or the stream terminates.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::Error;

/// What a listener is told
#[derive(Debug, Clone)]
pub enum Notification<T> {
    /// A value was emitted
    Next(T),
    /// The stream completed normally
    Complete,
    /// The stream failed
    Error(Error),
}

impl<T> Notification<T> {
    /// Whether this is `Complete` or `Error`
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Next(_))
    }
}

type Listener<T> = Arc<dyn Fn(Notification<T>) + Send + Sync>;
type Activation<T> = Box<dyn Fn(&EventStream<T>) -> Subscription + Send + Sync>;
type Teardown = Box<dyn FnOnce() + Send>;

/// Handle releasing a listener, an upstream link or any other teardown
///
/// `unsubscribe` is idempotent: the teardown runs at most once, no matter how
/// many clones of the handle call it. Dropping the handle does not
/// unsubscribe.
#[derive(Clone)]
#[must_use = "dropping a Subscription keeps the listener registered; call `unsubscribe` to release it"]
pub struct Subscription {
    teardown: Arc<Mutex<Option<Teardown>>>,
}

impl Subscription {
    /// Wrap a teardown closure
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Arc::new(Mutex::new(Some(Box::new(teardown)))),
        }
    }

    /// A handle with nothing to release
    pub fn empty() -> Self {
        Self {
            teardown: Arc::new(Mutex::new(None)),
        }
    }

    /// Combine several handles into one that releases all of them
    pub fn all(subscriptions: Vec<Subscription>) -> Self {
        Self::new(move || {
            for subscription in subscriptions {
                subscription.unsubscribe();
            }
        })
    }

    /// Run the teardown if it has not run yet
    pub fn unsubscribe(&self) {
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// Whether the teardown has already run (or there never was one)
    pub fn is_closed(&self) -> bool {
        self.teardown.lock().is_none()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Terminal {
    Completed,
    Failed(Error),
}

impl Terminal {
    fn notification<T>(&self) -> Notification<T> {
        match self {
            Self::Completed => Notification::Complete,
            Self::Failed(err) => Notification::Error(err.clone()),
        }
    }
}

struct State<T> {
    listeners: Vec<(u64, Listener<T>)>,
    next_id: u64,
    terminal: Option<Terminal>,
    /// Link to the upstream source while this derived stream is active
    upstream: Option<Subscription>,
    activating: bool,
    has_subscribed: bool,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    activation: Option<Activation<T>>,
    single_subscriber: bool,
}

/// A multi-listener, terminable channel of values
pub struct EventStream<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("EventStream")
            .field("listeners", &state.listeners.len())
            .field("terminal", &state.terminal)
            .field("active", &state.upstream.is_some())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Default for EventStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> EventStream<T> {
    /// Create an open source stream fed through [`emit`](Self::emit)
    pub fn new() -> Self {
        Self::build(None, false)
    }

    /// Create a stream fed by an external producer
    ///
    /// `attach` runs when the first listener subscribes and receives the
    /// stream to emit into; the [`Subscription`] it returns detaches the
    /// producer when the last listener leaves or the stream terminates. A
    /// later listener attaches the producer again.
    pub fn from_producer<F>(attach: F) -> Self
    where
        F: Fn(&EventStream<T>) -> Subscription + Send + Sync + 'static,
    {
        Self::build(Some(Box::new(attach)), false)
    }

    pub(crate) fn derived<F>(activation: F) -> Self
    where
        F: Fn(&EventStream<T>) -> Subscription + Send + Sync + 'static,
    {
        Self::build(Some(Box::new(activation)), false)
    }

    /// A derived stream that rejects every subscriber after the first
    pub(crate) fn derived_single<F>(activation: F) -> Self
    where
        F: Fn(&EventStream<T>) -> Subscription + Send + Sync + 'static,
    {
        Self::build(Some(Box::new(activation)), true)
    }

    fn build(activation: Option<Activation<T>>, single_subscriber: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    listeners: Vec::new(),
                    next_id: 0,
                    terminal: None,
                    upstream: None,
                    activating: false,
                    has_subscribed: false,
                }),
                activation,
                single_subscriber,
            }),
        }
    }

    /// Register a listener
    ///
    /// A listener registered on a terminal stream is told the terminal state
    /// immediately and gets an inert handle.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Notification<T>) + Send + Sync + 'static,
    {
        let listener: Listener<T> = Arc::new(listener);

        let (id, activate) = {
            let mut state = self.inner.state.lock();

            if let Some(notification) = state.terminal.as_ref().map(Terminal::notification) {
                drop(state);
                deliver(&listener, notification);
                return Subscription::empty();
            }

            if self.inner.single_subscriber && state.has_subscribed {
                drop(state);
                warn!("rejected second subscriber on a single-subscriber stream");
                deliver(&listener, Notification::Error(Error::AlreadySubscribed));
                return Subscription::empty();
            }

            state.has_subscribed = true;
            let id = state.next_id;
            state.next_id += 1;
            state.listeners.push((id, listener));

            let activate =
                self.inner.activation.is_some() && state.upstream.is_none() && !state.activating;
            if activate {
                state.activating = true;
            }
            (id, activate)
        };

        if activate {
            self.activate();
        }

        let stream = self.clone();
        Subscription::new(move || stream.remove_listener(id))
    }

    /// Register a listener interested only in values
    pub fn subscribe_values<F>(&self, on_next: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe(move |notification| {
            if let Notification::Next(value) = notification {
                on_next(value);
            }
        })
    }

    fn activate(&self) {
        let Some(activation) = &self.inner.activation else {
            return;
        };
        let upstream = activation(self);

        let mut state = self.inner.state.lock();
        state.activating = false;
        if state.terminal.is_some() || state.listeners.is_empty() {
            drop(state);
            upstream.unsubscribe();
        } else {
            debug!("stream activated");
            state.upstream = Some(upstream);
        }
    }

    fn remove_listener(&self, id: u64) {
        let upstream = {
            let mut state = self.inner.state.lock();
            let before = state.listeners.len();
            state.listeners.retain(|(listener_id, _)| *listener_id != id);
            if state.listeners.len() < before && state.listeners.is_empty() {
                state.upstream.take()
            } else {
                None
            }
        };

        if let Some(upstream) = upstream {
            debug!("last listener left, releasing upstream");
            upstream.unsubscribe();
        }
    }

    /// Deliver `value` to every listener registered at the time of the call
    ///
    /// A no-op once the stream is terminal.
    pub fn emit(&self, value: T) {
        let listeners: Vec<Listener<T>> = {
            let state = self.inner.state.lock();
            if state.terminal.is_some() {
                return;
            }
            state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        for listener in &listeners {
            deliver(listener, Notification::Next(value.clone()));
        }
    }

    /// Terminate normally
    pub fn complete(&self) {
        self.terminate(Terminal::Completed);
    }

    /// Terminate with an error
    pub fn fail(&self, err: Error) {
        self.terminate(Terminal::Failed(err));
    }

    fn terminate(&self, terminal: Terminal) {
        let (listeners, upstream) = {
            let mut state = self.inner.state.lock();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(terminal.clone());
            (std::mem::take(&mut state.listeners), state.upstream.take())
        };

        if let Some(upstream) = upstream {
            upstream.unsubscribe();
        }
        for (_, listener) in &listeners {
            deliver(listener, terminal.notification());
        }
    }

    /// Whether the stream has completed or failed
    pub fn is_terminal(&self) -> bool {
        self.inner.state.lock().terminal.is_some()
    }

    /// Terminal error, if the stream failed
    pub fn error(&self) -> Option<Error> {
        match &self.inner.state.lock().terminal {
            Some(Terminal::Failed(err)) => Some(err.clone()),
            _ => None,
        }
    }

    /// Listeners currently registered
    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }

    /// Whether a derived stream currently holds its upstream subscription
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().upstream.is_some()
    }
}

/// Invoke one listener, containing any panic it raises
fn deliver<T>(listener: &Listener<T>, notification: Notification<T>) {
    if catch_unwind(AssertUnwindSafe(|| listener(notification))).is_err() {
        error!("stream listener panicked; continuing with remaining listeners");
    }
}
