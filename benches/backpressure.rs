use criterion::{black_box, criterion_group, criterion_main, Criterion};
use eventflow::{BackpressureConfig, EventStream, OverflowPolicy};
use std::time::Duration;

fn run_slow_consumer(runtime: &tokio::runtime::Runtime, config: BackpressureConfig, messages: u32) {
    runtime.block_on(async {
        let source = EventStream::new();
        let consumer = source.backpressure(config).expect("Backpressure build failed");

        let producer = {
            let source = source.clone();
            std::thread::spawn(move || {
                for i in 0..messages {
                    source.emit(vec![i as u8; 64]);
                }
                source.complete();
            })
        };

        while let Ok(Some(data)) = consumer.next().await {
            black_box(data);
            tokio::task::yield_now().await;
        }
        let _ = producer.join();
    });
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .build()
        .expect("Runtime build failed")
}

fn benchmark_unbounded_slow_consumer(c: &mut Criterion) {
    let runtime = runtime();
    c.bench_function("unbounded_slow_consumer_2000_msgs", |b| {
        b.iter(|| run_slow_consumer(&runtime, BackpressureConfig::unbounded(), 2000));
    });
}

fn benchmark_evict_oldest_slow_consumer(c: &mut Criterion) {
    let runtime = runtime();
    c.bench_function("evict_oldest_slow_consumer_2000_msgs", |b| {
        b.iter(|| {
            run_slow_consumer(
                &runtime,
                BackpressureConfig::bounded(100, OverflowPolicy::EvictOldest),
                2000,
            )
        });
    });
}

fn benchmark_drop_incoming_slow_consumer(c: &mut Criterion) {
    let runtime = runtime();
    c.bench_function("drop_incoming_slow_consumer_2000_msgs", |b| {
        b.iter(|| {
            run_slow_consumer(
                &runtime,
                BackpressureConfig::bounded(100, OverflowPolicy::DropIncoming),
                2000,
            )
        });
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(15))
        .sample_size(20);
    targets = benchmark_unbounded_slow_consumer, benchmark_evict_oldest_slow_consumer, benchmark_drop_incoming_slow_consumer
);
criterion_main!(benches);
