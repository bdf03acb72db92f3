//! Static configuration for one processing node.
//!
//! [`NodeOptions`] is populated by the host (CLI, env, or code), validated
//! once at startup, and immutable thereafter. The dispatcher trusts a
//! validated instance and performs no secondary validation beyond defensive
//! asserts.

use crate::error::{Error, Result};
use core::num::NonZeroUsize;
use core::time::Duration;

/// Validated static configuration for a processing node.
///
/// All durations must be positive, `pool_size` must be at least 1, and the
/// node name must be non-empty. Construct with [`NodeOptions::new`], adjust
/// with the `with_*` builders, and hand to [`Dispatcher::new`], which runs
/// [`NodeOptions::validate`] and refuses to start on failure.
///
/// [`Dispatcher::new`]: crate::Dispatcher::new
#[derive(Clone, Debug)]
pub struct NodeOptions {
    /// Maximum number of requests processed concurrently. Also the number of
    /// pooled worker instances.
    pub pool_size: usize,
    /// Identity of this node, used in logs and worker contexts.
    pub node_name: String,
    /// Interval at which drain progress is re-checked during shutdown.
    pub poll_interval: Duration,
    /// Initial backoff applied after a failed transport pull.
    pub backoff_min: Duration,
    /// Upper bound for the exponential pull backoff.
    pub backoff_max: Duration,
    /// Requests the pull loop may hold in memory beyond the pool capacity.
    /// The default of 0 means "pull one, dispatch one".
    pub prefetch: usize,
    /// Retire and rebuild a worker after it has served this many requests.
    /// `None` disables recycling.
    pub requests_per_worker: Option<NonZeroUsize>,
    /// Per-request deadline. On expiry the request's cancellation token fires
    /// without affecting sibling workers. `None` disables the deadline.
    pub request_timeout: Option<Duration>,
    /// Whether a failed request is nacked with redelivery (`true`) or left to
    /// the transport's dead-letter policy (`false`).
    pub requeue_on_failure: bool,
}

impl NodeOptions {
    /// Creates options with the given pool size and node name and defaults
    /// suitable for tests and small deployments.
    pub fn new(pool_size: usize, node_name: impl Into<String>) -> Self {
        Self {
            pool_size,
            node_name: node_name.into(),
            poll_interval: Duration::from_millis(100),
            backoff_min: Duration::from_millis(50),
            backoff_max: Duration::from_secs(5),
            prefetch: 0,
            requests_per_worker: None,
            request_timeout: None,
            requeue_on_failure: true,
        }
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_min = min;
        self.backoff_max = max;
        self
    }

    pub fn with_requests_per_worker(mut self, limit: NonZeroUsize) -> Self {
        self.requests_per_worker = Some(limit);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_requeue_on_failure(mut self, requeue: bool) -> Self {
        self.requeue_on_failure = requeue;
        self
    }

    /// Checks the startup invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] naming the first violated invariant:
    /// zero pool size, an empty node name, a zero duration, or an inverted
    /// backoff range.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::invalid_options("pool_size must be at least 1"));
        }
        if self.node_name.trim().is_empty() {
            return Err(Error::invalid_options("node_name must be non-empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::invalid_options("poll_interval must be positive"));
        }
        if self.backoff_min.is_zero() || self.backoff_max.is_zero() {
            return Err(Error::invalid_options("backoff bounds must be positive"));
        }
        if self.backoff_min > self.backoff_max {
            return Err(Error::invalid_options(
                "backoff_min must not exceed backoff_max",
            ));
        }
        if let Some(timeout) = self.request_timeout {
            if timeout.is_zero() {
                return Err(Error::invalid_options("request_timeout must be positive"));
            }
        }
        Ok(())
    }
}
