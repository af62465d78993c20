use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::stream::{EventStream, Notification, Subscription};

impl<T: Clone + Send + 'static> EventStream<T> {
    /// Interleave this stream with `others` in arrival order
    ///
    /// The merged stream completes once every source has finished. A source
    /// that fails is logged and counted as finished; the remaining sources
    /// keep flowing.
    pub fn merge<I>(&self, others: I) -> EventStream<T>
    where
        I: IntoIterator<Item = EventStream<T>>,
    {
        let sources: Arc<Vec<EventStream<T>>> = Arc::new(
            std::iter::once(self.clone()).chain(others).collect(),
        );

        EventStream::derived(move |out| {
            let remaining = Arc::new(AtomicUsize::new(sources.len()));

            let subscriptions = sources
                .iter()
                .enumerate()
                .map(|(index, source)| {
                    let out = out.clone();
                    let remaining = Arc::clone(&remaining);
                    let finish = move |out: &EventStream<T>| {
                        if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                            out.complete();
                        }
                    };
                    source.subscribe(move |notification| match notification {
                        Notification::Next(value) => out.emit(value),
                        Notification::Complete => finish(&out),
                        Notification::Error(err) => {
                            warn!(source = index, error = %err, "merged source failed; treating it as finished");
                            finish(&out);
                        }
                    })
                })
                .collect();

            Subscription::all(subscriptions)
        })
    }
}

/// Merge any number of streams; see [`EventStream::merge`]
pub fn merge_all<T, I>(streams: I) -> Option<EventStream<T>>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = EventStream<T>>,
{
    let mut streams = streams.into_iter();
    let first = streams.next()?;
    Some(first.merge(streams))
}
