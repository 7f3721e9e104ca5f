use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use futures_util::stream::StreamExt;
use record_stream::operators::{chunk, from_iter};
use record_stream::pipeline::PipelineBuilder;
use record_stream::relay::with_backpressure;
use record_stream::{CancellationToken, StreamOptions};
use std::time::Duration;
use tokio::runtime::Runtime;

fn bench_relay_capacity(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("relay_capacity");
    group.measurement_time(Duration::from_secs(10));

    let data_size = 100_000u64;
    for capacity in [16usize, 256, 1000, 4096] {
        group.bench_with_input(
            BenchmarkId::new("fast_producer_slow_consumer", capacity),
            &capacity,
            |b, &capacity| {
                b.to_async(&rt).iter(|| async move {
                    let relayed = with_backpressure(from_iter(0..data_size), capacity, CancellationToken::new())
                        .unwrap();
                    let result = relayed
                        .then(|x| async move {
                            let x = x.unwrap();
                            // Simulate slow consumer
                            if x % 1000 == 0 {
                                tokio::task::yield_now().await;
                            }
                            black_box(x)
                        })
                        .count()
                        .await;
                    black_box(result)
                });
            },
        );
    }

    group.finish();
}

fn bench_pipeline_overhead(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("pipeline_overhead");

    let data_size = 50_000u64;
    group.bench_function("direct_chunk", |b| {
        b.to_async(&rt).iter(|| async {
            let batches = chunk(from_iter(0..data_size), 100).unwrap().count().await;
            black_box(batches)
        });
    });

    group.bench_function("pipeline_with_relay", |b| {
        let pipeline = PipelineBuilder::new(StreamOptions::new())
            .transform(|x: u64| async move { x.wrapping_mul(31) })
            .build()
            .unwrap();
        b.to_async(&rt).iter(|| async {
            let batches = pipeline
                .run_chunked(from_iter(0..data_size))
                .unwrap()
                .count()
                .await;
            black_box(batches)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_relay_capacity, bench_pipeline_overhead);
criterion_main!(benches);
