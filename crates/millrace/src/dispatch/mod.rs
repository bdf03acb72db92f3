//! The dispatcher: bounded fan-out from a transport to a pool of workers.
//!
//! A [`Dispatcher`] bridges an unbounded, externally fed stream of requests
//! to a fixed set of reusable workers. Capacity is a semaphore with one
//! permit per pool slot; the pull loop acquires a permit before taking a
//! request off the transport, which is the engine's sole backpressure point:
//! at most `pool_size + prefetch` requests are ever held in memory.
//!
//! Requests are *started* in pull order (the pull loop assigns them
//! sequentially, first-available slot, no priority queue); completion order
//! is unconstrained because workers run in parallel. Success and failure
//! propagate back to the transport as acks and nacks, and a failing request
//! never takes down the dispatcher or its sibling workers.

mod inflight;

pub use inflight::{InflightSnapshot, ProcessingRequestInfo};

use crate::error::{Error, Result};
use crate::metrics::EngineStats;
use crate::options::NodeOptions;
use crate::request::{Delivery, Request};
use crate::transport::Transport;
use crate::worker::{Outcome, Worker, WorkerContext, WorkerFactory};
use core::time::Duration;
use inflight::InflightMap;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound on how long a force-cancel waits for cooperative workers to
/// settle their outcomes after the work token fires.
const FORCE_SETTLE_TIMEOUT: Duration = Duration::from_secs(3);

/// Result of a graceful shutdown.
///
/// Both counts cover the set of requests in flight at the moment the drain
/// began; a request the pull loop assigns while its stop signal is still
/// propagating is cancelled with the rest but not reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrainReport {
    /// Requests that were in flight when the drain began and finished within
    /// the timeout.
    pub drained: usize,
    /// Requests still running at the timeout, cancelled cooperatively.
    pub force_cancelled: usize,
}

/// A pool slot: the worker instance plus its recycling bookkeeping.
struct PooledWorker<W> {
    worker: W,
    worker_id: usize,
    served: usize,
}

enum Pulled<R> {
    Delivery(Delivery<R>),
    /// The transport reported end of stream.
    Stopped,
    /// Shutdown fired while waiting for a message.
    Cancelled,
}

/// Routes requests from a [`Transport`] to a bounded pool of workers built by
/// a [`WorkerFactory`].
///
/// A dispatcher is single-use: [`start`] runs the pull loop until the
/// transport stops or [`shutdown`] is called, and a dispatcher that has been
/// shut down cannot be restarted.
///
/// [`start`]: Dispatcher::start
/// [`shutdown`]: Dispatcher::shutdown
pub struct Dispatcher<T, F>
where
    T: Transport,
    F: WorkerFactory,
    F::Worker: Worker<Request = T::Request>,
{
    inner: Arc<Inner<T, F>>,
    pull_handle: Mutex<Option<JoinHandle<()>>>,
}

struct Inner<T, F>
where
    T: Transport,
    F: WorkerFactory,
{
    options: NodeOptions,
    transport: Arc<T>,
    factory: F,
    capacity: Arc<Semaphore>,
    idle: Mutex<Vec<PooledWorker<F::Worker>>>,
    inflight: InflightMap,
    stats: Arc<EngineStats>,
    /// Stops the pull loop; in-flight work keeps running.
    pull_token: CancellationToken,
    /// Cancels in-flight work cooperatively. Per-request deadlines use child
    /// tokens of this one so a deadline never touches sibling workers.
    work_token: CancellationToken,
    running: AtomicBool,
}

impl<T, F> Dispatcher<T, F>
where
    T: Transport,
    F: WorkerFactory,
    F::Worker: Worker<Request = T::Request>,
{
    /// Validates `options`, builds one worker per pool slot via `factory`,
    /// and returns a dispatcher ready to [`start`](Dispatcher::start).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] if the options fail validation; the
    /// engine refuses to start with a bad configuration.
    pub fn new(options: NodeOptions, transport: Arc<T>, factory: F) -> Result<Self> {
        options.validate()?;

        let idle = (0..options.pool_size)
            .map(|worker_id| PooledWorker {
                worker: factory.make(WorkerContext {
                    worker_id,
                    node_name: options.node_name.clone(),
                }),
                worker_id,
                served: 0,
            })
            .collect();

        let capacity = Arc::new(Semaphore::new(options.pool_size));
        Ok(Self {
            inner: Arc::new(Inner {
                capacity,
                idle: Mutex::new(idle),
                inflight: InflightMap::new(),
                stats: EngineStats::new(),
                pull_token: CancellationToken::new(),
                work_token: CancellationToken::new(),
                running: AtomicBool::new(false),
                options,
                transport,
                factory,
            }),
            pull_handle: Mutex::new(None),
        })
    }

    /// Shared counters for this dispatcher, sampled by a
    /// [`MetricsCollector`](crate::MetricsCollector).
    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.inner.stats)
    }

    /// Snapshot of the currently in-flight requests.
    pub fn inflight(&self) -> InflightSnapshot {
        self.inner.inflight.snapshot()
    }

    /// In-flight requests older than `threshold`, for stuck-request checks.
    pub fn stuck(&self, threshold: Duration) -> InflightSnapshot {
        self.inner.inflight.stuck(threshold)
    }

    /// Begins pulling from the transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] on a second call, including after a
    /// shutdown, since a dispatcher is single-use.
    pub fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        tracing::info!(
            node = %self.inner.options.node_name,
            pool_size = self.inner.options.pool_size,
            prefetch = self.inner.options.prefetch,
            "dispatcher started"
        );

        let inner = Arc::clone(&self.inner);
        *self.pull_handle.lock() = Some(tokio::spawn(inner.run_pull_loop()));
        Ok(())
    }

    /// Stops pulling, waits up to `drain_timeout` for in-flight requests to
    /// finish, then cancels whatever remains.
    ///
    /// Force-cancelled requests complete as [`Outcome::Cancelled`] and are
    /// nacked without redelivery, so they are never silently lost. Calling
    /// `shutdown` again after it has completed is a no-op reporting zeros.
    pub async fn shutdown(&self, drain_timeout: Duration) -> DrainReport {
        self.inner.pull_token.cancel();

        // The report covers exactly this set: an assignment racing the stop
        // signal is cancelled below but not counted either way.
        let at_stop: HashSet<u64> = self
            .inner
            .inflight
            .snapshot()
            .iter()
            .map(|info| info.request_id)
            .collect();
        tracing::info!(in_flight = at_stop.len(), "draining in-flight requests");

        let poll = self.inner.options.poll_interval;
        let drained_in_time = tokio::time::timeout(drain_timeout, async {
            while !self.inner.inflight.is_empty() {
                tokio::time::sleep(poll).await;
            }
        })
        .await
        .is_ok();

        let force_cancelled = if drained_in_time {
            tracing::info!("all in-flight requests drained");
            0
        } else {
            let remaining = self
                .inner
                .inflight
                .snapshot()
                .iter()
                .filter(|info| at_stop.contains(&info.request_id))
                .count();
            tracing::warn!(remaining, "drain timed out; cancelling remaining work");
            self.inner.work_token.cancel();
            // Cooperative workers settle promptly; bound the wait regardless.
            let _ = tokio::time::timeout(FORCE_SETTLE_TIMEOUT, async {
                while !self.inner.inflight.is_empty() {
                    tokio::time::sleep(poll).await;
                }
            })
            .await;
            remaining
        };

        let handle = self.pull_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                tracing::error!(%error, "pull loop task failed");
            }
        }

        let drained = at_stop.len() - force_cancelled;
        tracing::info!(drained, force_cancelled, "dispatcher shut down");
        DrainReport {
            drained,
            force_cancelled,
        }
    }
}

impl<T, F> Inner<T, F>
where
    T: Transport,
    F: WorkerFactory,
    F::Worker: Worker<Request = T::Request>,
{
    async fn run_pull_loop(self: Arc<Self>) {
        // Deliveries pulled ahead of a free slot (prefetch margin only).
        let mut buffered: VecDeque<(Delivery<T::Request>, tokio::time::Instant)> = VecDeque::new();
        let mut backoff = self.options.backoff_min;
        let mut source_stopped = false;

        'pull: loop {
            // Dispatch already-pulled requests first, preserving pull order.
            if let Some((delivery, pulled_at)) = buffered.pop_front() {
                // Held = this delivery plus what remains buffered.
                let margin_room =
                    !source_stopped && buffered.len() + 1 < self.options.prefetch;
                if margin_room {
                    tokio::select! {
                        () = self.pull_token.cancelled() => {
                            buffered.push_front((delivery, pulled_at));
                            break 'pull;
                        }
                        permit = Arc::clone(&self.capacity).acquire_owned() => {
                            self.assign(delivery, pulled_at, permit.expect("capacity semaphore closed"));
                        }
                        pulled = self.pull(&mut backoff) => {
                            buffered.push_front((delivery, pulled_at));
                            match pulled {
                                Pulled::Delivery(next) => {
                                    buffered.push_back((next, tokio::time::Instant::now()));
                                }
                                Pulled::Stopped => source_stopped = true,
                                Pulled::Cancelled => break 'pull,
                            }
                        }
                    }
                } else {
                    tokio::select! {
                        () = self.pull_token.cancelled() => {
                            buffered.push_front((delivery, pulled_at));
                            break 'pull;
                        }
                        permit = Arc::clone(&self.capacity).acquire_owned() => {
                            self.assign(delivery, pulled_at, permit.expect("capacity semaphore closed"));
                        }
                    }
                }
                continue;
            }

            if source_stopped {
                break;
            }

            match Arc::clone(&self.capacity).try_acquire_owned() {
                Ok(permit) => match self.pull(&mut backoff).await {
                    Pulled::Delivery(delivery) => {
                        self.assign(delivery, tokio::time::Instant::now(), permit);
                    }
                    Pulled::Stopped => source_stopped = true,
                    Pulled::Cancelled => break 'pull,
                },
                Err(_) if buffered.len() < self.options.prefetch => {
                    // Pool saturated but the prefetch margin has room.
                    match self.pull(&mut backoff).await {
                        Pulled::Delivery(delivery) => {
                            buffered.push_back((delivery, tokio::time::Instant::now()));
                        }
                        Pulled::Stopped => source_stopped = true,
                        Pulled::Cancelled => break 'pull,
                    }
                }
                Err(_) => {
                    // Saturated and nothing buffered: wait for a slot. This is
                    // the backpressure point; no pull happens until a worker
                    // frees up.
                    let permit = tokio::select! {
                        () = self.pull_token.cancelled() => break 'pull,
                        permit = Arc::clone(&self.capacity).acquire_owned() => {
                            permit.expect("capacity semaphore closed")
                        }
                    };
                    match self.pull(&mut backoff).await {
                        Pulled::Delivery(delivery) => {
                            self.assign(delivery, tokio::time::Instant::now(), permit);
                        }
                        Pulled::Stopped => source_stopped = true,
                        Pulled::Cancelled => break 'pull,
                    }
                }
            }
        }

        // Requests pulled but never assigned go back to the transport.
        let returns = buffered
            .into_iter()
            .map(|(delivery, _)| self.transport.nack(delivery.handle, true));
        for result in futures::future::join_all(returns).await {
            if let Err(error) = result {
                tracing::warn!(%error, "failed to return unassigned delivery");
            }
        }

        tracing::debug!("pull loop stopped");
    }

    /// Pulls the next delivery, retrying transient transport errors with
    /// bounded exponential backoff and flagging degraded health while the
    /// transport is failing.
    async fn pull(&self, backoff: &mut Duration) -> Pulled<T::Request> {
        loop {
            let result = tokio::select! {
                () = self.pull_token.cancelled() => return Pulled::Cancelled,
                result = self.transport.pull_next() => result,
            };

            match result {
                Ok(Some(delivery)) => {
                    if self.stats.is_degraded() {
                        self.stats.set_degraded(false);
                        tracing::info!("transport recovered");
                    }
                    *backoff = self.options.backoff_min;
                    return Pulled::Delivery(delivery);
                }
                Ok(None) => {
                    tracing::info!("transport source stopped");
                    return Pulled::Stopped;
                }
                Err(error) => {
                    self.stats.set_degraded(true);
                    tracing::warn!(
                        %error,
                        backoff_ms = backoff.as_millis() as u64,
                        "transport pull failed; backing off"
                    );
                    tokio::select! {
                        () = self.pull_token.cancelled() => return Pulled::Cancelled,
                        () = tokio::time::sleep(*backoff) => {}
                    }
                    *backoff = (*backoff * 2).min(self.options.backoff_max);
                }
            }
        }
    }

    /// Records the in-flight entry and hands the delivery to an idle worker.
    ///
    /// Runs synchronously inside the pull loop so assignment timestamps
    /// follow pull order. The caller holds a capacity permit, which
    /// guarantees an idle worker exists.
    fn assign(
        self: &Arc<Self>,
        delivery: Delivery<T::Request>,
        pulled_at: tokio::time::Instant,
        permit: OwnedSemaphorePermit,
    ) {
        self.stats.record_queue_wait(pulled_at.elapsed());
        self.inflight.insert(ProcessingRequestInfo {
            request_id: delivery.request.request_id(),
            tags: delivery.request.tags(),
            started_at: Instant::now(),
        });

        let slot = self
            .idle
            .lock()
            .pop()
            .expect("pool accounting corrupt: permit held but no idle worker");

        let inner = Arc::clone(self);
        tokio::spawn(inner.run_request(slot, delivery, permit));
    }

    async fn run_request(
        self: Arc<Self>,
        mut slot: PooledWorker<F::Worker>,
        delivery: Delivery<T::Request>,
        permit: OwnedSemaphorePermit,
    ) {
        let Delivery { request, handle } = delivery;
        let request_id = request.request_id();
        let cancel = self.work_token.child_token();

        // A per-request deadline fires the same cooperative cancellation as
        // shutdown, scoped to this one worker.
        let deadline_guard = self.options.request_timeout.map(|timeout| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel();
            })
        });

        self.stats.worker_started();
        tracing::debug!(request_id, worker_id = slot.worker_id, "processing request");
        let outcome = slot.worker.process(request, &cancel).await;
        self.stats.worker_finished();
        if let Some(guard) = deadline_guard {
            guard.abort();
        }

        // Remove before settling: a nack may redeliver this id immediately,
        // and the new assignment must not collide with the old entry.
        let info = self.inflight.remove(request_id);
        tracing::debug!(
            request_id,
            elapsed_ms = info.started_at.elapsed().as_millis() as u64,
            "request finished"
        );

        match outcome {
            Outcome::Success => {
                self.stats.record_processed();
                if let Err(error) = self.transport.ack(handle).await {
                    tracing::warn!(request_id, %error, "ack failed");
                }
            }
            Outcome::Failure { reason } => {
                self.stats.record_failed();
                tracing::warn!(request_id, %reason, "request failed");
                let requeue = self.options.requeue_on_failure;
                if let Err(error) = self.transport.nack(handle, requeue).await {
                    tracing::warn!(request_id, %error, "nack failed");
                }
            }
            Outcome::Cancelled => {
                self.stats.record_cancelled();
                tracing::debug!(request_id, "request cancelled");
                if let Err(error) = self.transport.nack(handle, false).await {
                    tracing::warn!(request_id, %error, "nack failed");
                }
            }
        }

        slot.served += 1;
        let recycle = self
            .options
            .requests_per_worker
            .is_some_and(|limit| slot.served >= limit.get());
        if recycle {
            let worker_id = slot.worker_id;
            drop(slot);
            let fresh = PooledWorker {
                worker: self.factory.make(WorkerContext {
                    worker_id,
                    node_name: self.options.node_name.clone(),
                }),
                worker_id,
                served: 0,
            };
            self.idle.lock().push(fresh);
            tracing::debug!(worker_id, "worker recycled");
        } else {
            self.idle.lock().push(slot);
        }

        // Release the capacity unit only once the slot is back in the pool.
        drop(permit);
    }
}
