use core::time::Duration;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use millrace::{
    ChannelTransport, Dispatcher, NodeOptions, Outcome, Request, Worker, WorkerContext,
    WorkerFactory,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;

/// Requests routed per benchmark iteration.
const TOTAL_REQUESTS: usize = 4096;

#[derive(Clone)]
struct BenchRequest {
    id: u64,
}

impl Request for BenchRequest {
    fn request_id(&self) -> u64 {
        self.id
    }

    fn locale(&self) -> &str {
        "en-US"
    }
}

struct NoopWorker;

impl Worker for NoopWorker {
    type Request = BenchRequest;

    async fn process(&mut self, _request: BenchRequest, _cancel: &CancellationToken) -> Outcome {
        Outcome::Success
    }
}

struct NoopFactory;

impl WorkerFactory for NoopFactory {
    type Worker = NoopWorker;

    fn make(&self, _ctx: WorkerContext) -> NoopWorker {
        NoopWorker
    }
}

/// Measures end-to-end routing overhead: pull, assign, settle, recycle, with
/// workers that do no work of their own.
fn bench_dispatch(c: &mut Criterion, group_name: &str, pool_size: usize) {
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_REQUESTS as u64));

    group.bench_function(format!("elems/{}", TOTAL_REQUESTS), |b| {
        let rt = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(2)
            .build()
            .unwrap();

        b.to_async(&rt).iter_custom(move |iters| async move {
            let start = Instant::now();

            for _ in 0..iters {
                let (producer, transport) = ChannelTransport::bounded(TOTAL_REQUESTS);
                let transport = Arc::new(transport);
                let dispatcher = Dispatcher::new(
                    NodeOptions::new(pool_size, "bench"),
                    transport,
                    NoopFactory,
                )
                .unwrap();
                let stats = dispatcher.stats();

                dispatcher.start().unwrap();
                for id in 0..TOTAL_REQUESTS as u64 {
                    producer.send(BenchRequest { id }).await.unwrap();
                }
                drop(producer);

                while stats.snapshot().processed_total < TOTAL_REQUESTS as u64 {
                    tokio::time::sleep(Duration::from_micros(50)).await;
                }
                dispatcher.shutdown(Duration::from_secs(1)).await;
            }

            start.elapsed()
        });
    });

    group.finish();
}

fn dispatch_single_slot(c: &mut Criterion) {
    bench_dispatch(c, "dispatch/pool_1", 1);
}

fn dispatch_small_pool(c: &mut Criterion) {
    bench_dispatch(c, "dispatch/pool_8", 8);
}

criterion_group!(benches, dispatch_single_slot, dispatch_small_pool);
criterion_main!(benches);
