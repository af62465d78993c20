use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{sleep_until, Instant};
use tracing::warn;

use crate::error::{Error, Result};

/// A single restartable delay owned by an operator activation
///
/// Arming replaces any earlier schedule. Each arm gets a new generation, so a
/// callback that lost the race against `cancel` or a re-arm sees that it is
/// stale and does nothing.
#[derive(Debug)]
pub(crate) struct Timer {
    runtime: Option<Handle>,
    generation: u64,
    task: Option<AbortHandle>,
}

impl Timer {
    /// Bind to the current tokio runtime
    pub(crate) fn current() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| Error::NoRuntime(e.to_string()))?;
        Ok(Self {
            runtime: Some(runtime),
            generation: 0,
            task: None,
        })
    }

    /// A timer that can never fire, for activations that do not need one
    pub(crate) fn detached() -> Self {
        Self {
            runtime: None,
            generation: 0,
            task: None,
        }
    }

    /// Schedule `on_fire(generation)` after `delay`, replacing any pending schedule
    pub(crate) fn arm<F>(&mut self, delay: Duration, on_fire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        let Some(runtime) = &self.runtime else {
            warn!("timer armed without a runtime; ignoring");
            return;
        };
        let generation = self.generation;
        let deadline = Instant::now() + delay;
        let task = runtime.spawn(async move {
            sleep_until(deadline).await;
            on_fire(generation);
        });
        self.task = Some(task.abort_handle());
    }

    /// Claim a firing; false when the generation was cancelled or re-armed
    pub(crate) fn fired(&mut self, generation: u64) -> bool {
        if self.task.is_some() && self.generation == generation {
            self.task = None;
            self.generation += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_rearm_supersedes_previous_schedule() {
        let mut timer = Timer::current().unwrap();
        let fired = Arc::new(AtomicU64::new(u64::MAX));

        let slot = Arc::clone(&fired);
        timer.arm(Duration::from_millis(10), move |g| slot.store(g, Ordering::SeqCst));
        let first = timer.generation;
        let slot = Arc::clone(&fired);
        timer.arm(Duration::from_millis(20), move |g| slot.store(g, Ordering::SeqCst));
        let second = timer.generation;
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), second);
        assert!(!timer.fired(first));
        assert!(timer.fired(second));
        assert!(!timer.fired(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let mut timer = Timer::current().unwrap();
        let fired = Arc::new(AtomicU64::new(0));
        let slot = Arc::clone(&fired);
        timer.arm(Duration::from_millis(5), move |_| {
            slot.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_runtime() {
        assert!(matches!(Timer::current(), Err(Error::NoRuntime(_))));
        let mut detached = Timer::detached();
        detached.arm(Duration::from_millis(1), |_| {});
        assert!(!detached.is_armed());
    }
}
