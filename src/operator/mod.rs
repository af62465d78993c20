//! Operators deriving new streams from existing ones.
//!
//! Every operator returns a lazily activated [`EventStream`]: nothing is
//! subscribed upstream, and no timer is started, until the derived stream
//! gets its first listener. Per-activation state (counters, pending values,
//! timers) is created fresh on each activation and dropped by the teardown
//! the activation returns.

mod basic;
mod merge;
mod timer;
mod timing;

pub use merge::merge_all;

use crate::stream::{EventStream, Notification, Subscription};

/// Subscribe `out` to `source`, forwarding terminal notifications unchanged
/// and routing values through `on_next`
fn relay<T, R, F>(source: &EventStream<T>, out: &EventStream<R>, on_next: F) -> Subscription
where
    T: Clone + Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(&EventStream<R>, T) + Send + Sync + 'static,
{
    let out = out.clone();
    source.subscribe(move |notification| match notification {
        Notification::Next(value) => on_next(&out, value),
        Notification::Complete => out.complete(),
        Notification::Error(err) => out.fail(err),
    })
}
