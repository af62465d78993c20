use eventflow::{BatchConfig, Error, EventStream, Notification, Subscription};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone, PartialEq)]
enum Seen<T> {
    Value(T),
    Done,
    Failed(String),
}

/// Records notifications together with the paused-clock time they arrived
struct Recorder<T> {
    events: Arc<Mutex<Vec<(Duration, Seen<T>)>>>,
    started: Instant,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    fn attach(stream: &EventStream<T>) -> (Self, Subscription) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let started = Instant::now();
        let sink = Arc::clone(&events);
        let subscription = stream.subscribe(move |notification| {
            let seen = match notification {
                Notification::Next(value) => Seen::Value(value),
                Notification::Complete => Seen::Done,
                Notification::Error(err) => Seen::Failed(err.to_string()),
            };
            sink.lock().push((started.elapsed(), seen));
        });
        (Self { events, started }, subscription)
    }

    fn seen(&self) -> Vec<Seen<T>> {
        self.events.lock().iter().map(|(_, s)| s.clone()).collect()
    }

    fn times(&self) -> Vec<Duration> {
        self.events.lock().iter().map(|(t, _)| *t).collect()
    }

    fn since_start(&self) -> Duration {
        self.started.elapsed()
    }
}

#[tokio::test(start_paused = true)]
async fn test_debounce_emits_last_value_after_quiet_period() {
    let source = EventStream::new();
    let (recorder, _sub) = Recorder::attach(&source.debounce(Duration::from_millis(50)));

    source.emit(1);
    sleep(Duration::from_millis(10)).await;
    source.emit(2);
    sleep(Duration::from_millis(10)).await;
    source.emit(3);
    sleep(Duration::from_millis(100)).await;

    assert_eq!(recorder.seen(), vec![Seen::Value(3)]);
    let fired_at = recorder.times()[0];
    assert!(fired_at >= Duration::from_millis(70) && fired_at <= Duration::from_millis(71));
    assert!(recorder.since_start() >= Duration::from_millis(120));
}

#[tokio::test(start_paused = true)]
async fn test_debounce_flushes_on_completion() {
    let source = EventStream::new();
    let (recorder, _sub) = Recorder::attach(&source.debounce(Duration::from_millis(50)));

    source.emit("a");
    source.emit("b");
    source.complete();
    assert_eq!(recorder.seen(), vec![Seen::Value("b"), Seen::Done]);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.seen().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_debounce_error_discards_pending() {
    let source = EventStream::new();
    let (recorder, _sub) = Recorder::attach(&source.debounce(Duration::from_millis(50)));

    source.emit(1);
    source.fail(Error::producer("disconnected"));
    sleep(Duration::from_millis(100)).await;

    let seen = recorder.seen();
    assert_eq!(seen.len(), 1);
    assert!(matches!(&seen[0], Seen::Failed(msg) if msg.contains("disconnected")));
}

#[tokio::test(start_paused = true)]
async fn test_debounce_unsubscribe_clears_timer() {
    let source = EventStream::new();
    let debounced = source.debounce(Duration::from_millis(50));
    let (recorder, sub) = Recorder::attach(&debounced);

    source.emit(1);
    sub.unsubscribe();
    assert_eq!(source.listener_count(), 0);
    assert!(!debounced.is_active());

    sleep(Duration::from_millis(100)).await;
    assert!(recorder.seen().is_empty());
}

#[test]
fn test_debounce_without_runtime_fails_stream() {
    let source = EventStream::<u8>::new();
    let debounced = source.debounce(Duration::from_millis(5));
    let failure = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&failure);
    let _sub = debounced.subscribe(move |notification| {
        if let Notification::Error(err) = notification {
            *slot.lock() = Some(err);
        }
    });

    assert!(matches!(*failure.lock(), Some(Error::NoRuntime(_))));
    assert_eq!(source.listener_count(), 0);
}

#[test]
fn test_buffer_count_with_partial_tail() {
    let source = EventStream::new();
    let (recorder, _sub) = Recorder::attach(&source.buffer_count(3).unwrap());

    for i in 0..7 {
        source.emit(i);
    }
    source.complete();

    assert_eq!(
        recorder.seen(),
        vec![
            Seen::Value(vec![0, 1, 2]),
            Seen::Value(vec![3, 4, 5]),
            Seen::Value(vec![6]),
            Seen::Done,
        ]
    );
}

#[test]
fn test_batch_can_discard_partial_on_end() {
    let source = EventStream::new();
    let batched = source
        .batch(BatchConfig::new(4).emit_partial_on_end(false))
        .unwrap();
    let (recorder, _sub) = Recorder::attach(&batched);

    source.emit(1);
    source.complete();
    assert_eq!(recorder.seen(), vec![Seen::Done]);
}

#[test]
fn test_batch_rejects_invalid_config() {
    let source = EventStream::<u8>::new();
    assert!(matches!(source.buffer_count(0), Err(Error::InvalidArgument(_))));
    assert!(matches!(
        source.batch(BatchConfig::new(2).min_size(3)),
        Err(Error::InvalidArgument(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_buffer_time_flushes_per_window() {
    let source = EventStream::new();
    let (recorder, _sub) = Recorder::attach(&source.buffer_time(Duration::from_millis(50)).unwrap());

    source.emit(1);
    source.emit(2);
    sleep(Duration::from_millis(60)).await;
    assert_eq!(recorder.seen(), vec![Seen::Value(vec![1, 2])]);

    // No value, no window
    sleep(Duration::from_millis(200)).await;
    assert_eq!(recorder.seen().len(), 1);

    source.emit(3);
    sleep(Duration::from_millis(60)).await;
    assert_eq!(recorder.seen(), vec![Seen::Value(vec![1, 2]), Seen::Value(vec![3])]);
}

#[tokio::test(start_paused = true)]
async fn test_batch_size_flush_cancels_window() {
    let source = EventStream::new();
    let config = BatchConfig::new(2).max_wait(Duration::from_millis(50));
    let (recorder, _sub) = Recorder::attach(&source.batch(config).unwrap());

    source.emit(1);
    source.emit(2);
    assert_eq!(recorder.seen(), vec![Seen::Value(vec![1, 2])]);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.seen().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_holds_timed_flush_below_min_size() {
    let source = EventStream::new();
    let config = BatchConfig::new(10)
        .min_size(3)
        .max_wait(Duration::from_millis(50));
    let (recorder, _sub) = Recorder::attach(&source.batch(config).unwrap());

    source.emit(1);
    source.emit(2);
    sleep(Duration::from_millis(60)).await;
    assert!(recorder.seen().is_empty());

    source.emit(3);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.seen(), vec![Seen::Value(vec![1, 2, 3])]);
}

#[test]
fn test_producer_attached_lazily_and_reattached() {
    let attached = Arc::new(AtomicUsize::new(0));
    let detached = Arc::new(AtomicUsize::new(0));
    let (a, d) = (Arc::clone(&attached), Arc::clone(&detached));
    let source = EventStream::<u32>::from_producer(move |_| {
        a.fetch_add(1, Ordering::SeqCst);
        let d = Arc::clone(&d);
        Subscription::new(move || {
            d.fetch_add(1, Ordering::SeqCst);
        })
    });

    let chain = source.map(|x| x + 1).filter(|x| x % 2 == 0);
    assert_eq!(attached.load(Ordering::SeqCst), 0);

    let first = chain.subscribe_values(|_| {});
    let second = chain.subscribe_values(|_| {});
    assert_eq!(attached.load(Ordering::SeqCst), 1);

    first.unsubscribe();
    assert_eq!(detached.load(Ordering::SeqCst), 0);
    second.unsubscribe();
    assert_eq!(detached.load(Ordering::SeqCst), 1);

    let third = chain.subscribe_values(|_| {});
    assert_eq!(attached.load(Ordering::SeqCst), 2);
    third.unsubscribe();
    assert_eq!(detached.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_merge_of_timed_sources() {
    let fast = EventStream::new();
    let slow = EventStream::new();
    let merged = fast
        .debounce(Duration::from_millis(10))
        .merge([slow.debounce(Duration::from_millis(30))]);
    let (recorder, _sub) = Recorder::attach(&merged);

    slow.emit("slow");
    fast.emit("fast");
    sleep(Duration::from_millis(50)).await;
    fast.complete();
    slow.complete();

    assert_eq!(
        recorder.seen(),
        vec![Seen::Value("fast"), Seen::Value("slow"), Seen::Done]
    );
}
