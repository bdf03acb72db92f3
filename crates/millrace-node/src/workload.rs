//! Synthetic workload driving the node: a clock-paced producer, a worker that
//! simulates request latency, and a metrics sink that writes to the log.

use core::time::Duration;
use millrace::{
    MetricsSink, Outcome, Producer, Request, RequestTags, Worker, WorkerContext, WorkerFactory,
};
use tokio_util::sync::CancellationToken;

/// A generated request carrying only what the engine contract requires.
#[derive(Clone, Debug)]
pub struct SyntheticRequest {
    pub id: u64,
    pub tags: RequestTags,
}

impl Request for SyntheticRequest {
    fn request_id(&self) -> u64 {
        self.id
    }

    fn locale(&self) -> &str {
        "en-US"
    }

    fn tags(&self) -> RequestTags {
        self.tags
    }
}

/// Simulates request processing: sleeps for the configured work duration,
/// honoring cooperative cancellation, and fails every Nth request when
/// configured to.
pub struct DemoWorker {
    ctx: WorkerContext,
    work: Duration,
    fail_every: Option<u64>,
}

impl Worker for DemoWorker {
    type Request = SyntheticRequest;

    async fn process(
        &mut self,
        request: SyntheticRequest,
        cancel: &CancellationToken,
    ) -> Outcome {
        tracing::debug!(
            request_id = request.id,
            worker_id = self.ctx.worker_id,
            node = %self.ctx.node_name,
            "handling request"
        );

        tokio::select! {
            () = cancel.cancelled() => Outcome::Cancelled,
            () = tokio::time::sleep(self.work) => {
                match self.fail_every {
                    Some(n) if request.id % n == 0 => {
                        Outcome::failure(format!("synthetic failure on request {}", request.id))
                    }
                    _ => Outcome::Success,
                }
            }
        }
    }
}

pub struct DemoFactory {
    work: Duration,
    fail_every: Option<u64>,
}

impl DemoFactory {
    pub fn new(work: Duration, fail_every: Option<u64>) -> Self {
        Self { work, fail_every }
    }
}

impl WorkerFactory for DemoFactory {
    type Worker = DemoWorker;

    fn make(&self, ctx: WorkerContext) -> DemoWorker {
        DemoWorker {
            ctx,
            work: self.work,
            fail_every: self.fail_every,
        }
    }
}

/// Feeds the transport one request per tick until cancelled. Sending blocks
/// when the queue is full, so a saturated node paces the producer too.
pub async fn produce(
    producer: Producer<SyntheticRequest>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut seq = 0u64;
    let mut tick = tokio::time::interval(every);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }

        seq += 1;
        let request = SyntheticRequest {
            id: seq,
            tags: RequestTags {
                project_id: seq % 3,
                client_id: seq % 5,
            },
        };
        let send = tokio::select! {
            () = cancel.cancelled() => break,
            result = producer.send(request) => result,
        };
        if send.is_err() {
            tracing::warn!("request queue closed; producer stopping");
            break;
        }
    }

    tracing::info!(produced = seq, "producer stopped");
}

/// Writes sampled engine metrics to the log, one event per observation.
pub struct LogSink;

impl MetricsSink for LogSink {
    fn observe(&self, name: &str, value: f64) {
        tracing::info!(metric = name, value, "engine metric");
    }
}
