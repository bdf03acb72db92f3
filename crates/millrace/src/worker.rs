//! The worker contract: execute exactly one request to completion.
//!
//! Workers are pooled and reused across requests. A worker instance processes
//! at most one request at a time; the dispatcher guarantees exclusive `&mut`
//! access for the duration of a request. Implementations must fully reset any
//! request-derived state between uses.

use crate::request::Request;
use tokio_util::sync::CancellationToken;

/// Terminal outcome of processing one request.
///
/// Drives settlement at the transport boundary: `Success` acks, `Failure`
/// nacks with redelivery per [`NodeOptions::requeue_on_failure`], and
/// `Cancelled` nacks without redelivery so the transport decides its fate.
///
/// [`NodeOptions::requeue_on_failure`]: crate::NodeOptions::requeue_on_failure
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure { reason: String },
    Cancelled,
}

impl Outcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }
}

/// Executor of one request at a time.
///
/// `process` must honor `cancel` promptly: check it at natural suspension
/// points (before and after each sub-step) so that a shutdown drain can meet
/// its timeout. Side effects must be idempotent or deduplicated on the
/// request id: the engine passes the transport's at-least-once contract
/// through, so a redelivery after a crash before acknowledgment will run the
/// same request again.
pub trait Worker: Send + 'static {
    type Request: Request;

    /// Processes a single request to a terminal [`Outcome`].
    ///
    /// Returning [`Outcome::Cancelled`] is the correct response to `cancel`
    /// firing mid-request; the dispatcher then nacks without redelivery.
    fn process(
        &mut self,
        request: Self::Request,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Outcome> + Send;
}

/// Per-worker identity handed to the factory at construction time.
///
/// This is the hook for side-channel state a generic resolver cannot supply:
/// a logger scoped with the worker's identity, a dedicated result sink, a
/// per-worker connection. The factory closes over such state and binds it
/// into the worker it builds; the built worker owns it exclusively.
#[derive(Clone, Debug)]
pub struct WorkerContext {
    pub worker_id: usize,
    pub node_name: String,
}

/// Builds workers for the pool, once per slot at startup and again whenever a
/// worker is recycled after `requests_per_worker` uses.
pub trait WorkerFactory: Send + Sync + 'static {
    type Worker: Worker;

    fn make(&self, ctx: WorkerContext) -> Self::Worker;
}
