use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::warn;

use super::relay;
use crate::stream::{EventStream, Subscription};

impl<T: Clone + Send + 'static> EventStream<T> {
    /// Emit `f(value)` for each upstream value
    ///
    /// A panic in `f` drops that one value and is logged; the stream goes on.
    pub fn map<R, F>(&self, f: F) -> EventStream<R>
    where
        R: Clone + Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        EventStream::derived(move |out| {
            let f = Arc::clone(&f);
            relay(&source, out, move |out, value| out.emit(f(value)))
        })
    }

    /// Emit the `Ok` results of a fallible transform, logging and skipping
    /// values for which it fails
    pub fn try_map<R, E, F>(&self, f: F) -> EventStream<R>
    where
        R: Clone + Send + 'static,
        E: Display,
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        EventStream::derived(move |out| {
            let f = Arc::clone(&f);
            relay(&source, out, move |out, value| match f(value) {
                Ok(mapped) => out.emit(mapped),
                Err(err) => warn!(error = %err, "transform failed; value skipped"),
            })
        })
    }

    /// Emit only the values matching `predicate`
    pub fn filter<F>(&self, predicate: F) -> EventStream<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let source = self.clone();
        let predicate = Arc::new(predicate);
        EventStream::derived(move |out| {
            let predicate = Arc::clone(&predicate);
            relay(&source, out, move |out, value| {
                if predicate(&value) {
                    out.emit(value);
                }
            })
        })
    }

    /// Filter with a fallible predicate; a failing check drops the value
    pub fn try_filter<E, F>(&self, predicate: F) -> EventStream<T>
    where
        E: Display,
        F: Fn(&T) -> Result<bool, E> + Send + Sync + 'static,
    {
        let source = self.clone();
        let predicate = Arc::new(predicate);
        EventStream::derived(move |out| {
            let predicate = Arc::clone(&predicate);
            relay(&source, out, move |out, value| match predicate(&value) {
                Ok(true) => out.emit(value),
                Ok(false) => {}
                Err(err) => warn!(error = %err, "predicate failed; value skipped"),
            })
        })
    }

    /// Emit the first `n` values, then complete and release upstream
    ///
    /// The returned stream accepts a single subscriber so that "first n"
    /// stays well defined; later subscribers receive
    /// [`Error::AlreadySubscribed`](crate::Error::AlreadySubscribed).
    pub fn take(&self, n: usize) -> EventStream<T> {
        let source = self.clone();
        EventStream::derived_single(move |out| {
            if n == 0 {
                out.complete();
                return Subscription::empty();
            }
            let seen = AtomicUsize::new(0);
            relay(&source, out, move |out, value| {
                let index = seen.fetch_add(1, Ordering::SeqCst);
                if index < n {
                    out.emit(value);
                    if index + 1 == n {
                        out.complete();
                    }
                }
            })
        })
    }

    /// Discard the first `n` values and emit the rest
    pub fn skip(&self, n: usize) -> EventStream<T> {
        let source = self.clone();
        EventStream::derived(move |out| {
            let seen = AtomicUsize::new(0);
            relay(&source, out, move |out, value| {
                if seen.fetch_add(1, Ordering::SeqCst) >= n {
                    out.emit(value);
                }
            })
        })
    }
}
