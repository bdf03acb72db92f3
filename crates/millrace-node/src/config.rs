use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use millrace::NodeOptions;
use std::num::NonZeroUsize;

/// Runtime configuration for the `millrace-node` binary.
///
/// These settings control the node's concurrency, backpressure, and the
/// synthetic workload it runs. All values are parsed from CLI arguments or
/// environment variables, with reasonable defaults suitable for local
/// experimentation.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "millrace-node",
    version,
    about = "A bounded request-processing node with a pooled worker dispatcher"
)]
pub struct CliArgs {
    /// Name of this node, included in logs and worker contexts.
    ///
    /// Environment variable: `NODE_NAME`
    #[arg(long, env = "NODE_NAME", default_value_t = String::from("millrace-node"))]
    pub node_name: String,

    /// Number of concurrent workers in the pool.
    ///
    /// Defaults to the number of logical CPUs. This is the hard cap on
    /// concurrently processed requests.
    ///
    /// Environment variable: `POOL_SIZE`
    #[arg(long, env = "POOL_SIZE", default_value_t = num_cpus::get())]
    pub pool_size: usize,

    /// Number of requests pulled ahead of a free worker slot.
    ///
    /// Zero (the default) means strictly pull-one-dispatch-one; larger values
    /// trade a small amount of buffering for lower slot idle time.
    ///
    /// Environment variable: `PREFETCH`
    #[arg(long, env = "PREFETCH", default_value_t = 0)]
    pub prefetch: usize,

    /// Requests a worker serves before being replaced with a fresh instance.
    ///
    /// Zero disables recycling; workers then live for the node's lifetime.
    ///
    /// Environment variable: `REQUESTS_PER_WORKER`
    #[arg(long, env = "REQUESTS_PER_WORKER", default_value_t = 0)]
    pub requests_per_worker: usize,

    /// Per-request deadline in milliseconds. Zero disables the deadline.
    ///
    /// A request exceeding it is cancelled cooperatively and nacked without
    /// redelivery.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_MS`
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 0)]
    pub request_timeout_ms: u64,

    /// Do not redeliver failed requests.
    ///
    /// By default a failed request is nacked with redelivery and retried.
    ///
    /// Environment variable: `NO_REQUEUE`
    #[arg(long, env = "NO_REQUEUE", default_value_t = false)]
    pub no_requeue: bool,

    /// How long to wait for in-flight requests on shutdown, in milliseconds.
    ///
    /// Requests still running at the deadline are cancelled cooperatively.
    ///
    /// Environment variable: `DRAIN_TIMEOUT_MS`
    #[arg(long, env = "DRAIN_TIMEOUT_MS", default_value_t = 5_000)]
    pub drain_timeout_ms: u64,

    /// Capacity of the in-process request queue feeding the node.
    ///
    /// The producer blocks once the queue is full, extending the engine's
    /// backpressure to the source.
    ///
    /// Environment variable: `QUEUE_CAPACITY`
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 64)]
    pub queue_capacity: usize,

    /// Interval between synthetic requests, in milliseconds.
    ///
    /// Environment variable: `PRODUCE_EVERY_MS`
    #[arg(long, env = "PRODUCE_EVERY_MS", default_value_t = 100)]
    pub produce_every_ms: u64,

    /// Simulated processing time per request, in milliseconds.
    ///
    /// Environment variable: `WORK_MS`
    #[arg(long, env = "WORK_MS", default_value_t = 250)]
    pub work_ms: u64,

    /// Fail every Nth request to exercise the failure path. Zero disables
    /// synthetic failures.
    ///
    /// Environment variable: `FAIL_EVERY`
    #[arg(long, env = "FAIL_EVERY", default_value_t = 0)]
    pub fail_every: u64,

    /// Metrics sampling interval, in milliseconds.
    ///
    /// Environment variable: `METRICS_INTERVAL_MS`
    #[arg(long, env = "METRICS_INTERVAL_MS", default_value_t = 10_000)]
    pub metrics_interval_ms: u64,
}

/// Validated node configuration: engine options plus workload knobs.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub options: NodeOptions,
    pub drain_timeout: Duration,
    pub queue_capacity: usize,
    pub produce_every: Duration,
    pub work: Duration,
    pub fail_every: Option<u64>,
    pub metrics_interval: Duration,
}

impl TryFrom<CliArgs> for NodeConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.queue_capacity == 0 {
            bail!("QUEUE_CAPACITY must be greater than 0");
        }
        if args.drain_timeout_ms == 0 {
            bail!("DRAIN_TIMEOUT_MS must be greater than 0");
        }
        if args.metrics_interval_ms == 0 {
            bail!("METRICS_INTERVAL_MS must be greater than 0");
        }

        let mut options = NodeOptions::new(args.pool_size, args.node_name)
            .with_prefetch(args.prefetch)
            .with_requeue_on_failure(!args.no_requeue);
        if let Some(limit) = NonZeroUsize::new(args.requests_per_worker) {
            options = options.with_requests_per_worker(limit);
        }
        if args.request_timeout_ms > 0 {
            options = options.with_request_timeout(Duration::from_millis(args.request_timeout_ms));
        }
        // Engine-level validation (pool size, name, durations) runs again in
        // Dispatcher::new; surfacing it here gives a CLI-shaped error.
        options
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid node options: {e}"))?;

        Ok(Self {
            options,
            drain_timeout: Duration::from_millis(args.drain_timeout_ms),
            queue_capacity: args.queue_capacity,
            produce_every: Duration::from_millis(args.produce_every_ms),
            work: Duration::from_millis(args.work_ms),
            fail_every: (args.fail_every > 0).then_some(args.fail_every),
            metrics_interval: Duration::from_millis(args.metrics_interval_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> CliArgs {
        CliArgs::parse_from(["millrace-node"])
    }

    #[test]
    fn defaults_convert_cleanly() {
        let config = NodeConfig::try_from(args()).unwrap();
        assert_eq!(config.options.pool_size, num_cpus::get());
        assert_eq!(config.options.prefetch, 0);
        assert!(config.options.requeue_on_failure);
        assert!(config.options.requests_per_worker.is_none());
        assert!(config.options.request_timeout.is_none());
        assert_eq!(config.drain_timeout, Duration::from_secs(5));
        assert!(config.fail_every.is_none());
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let mut bad = args();
        bad.queue_capacity = 0;
        assert!(NodeConfig::try_from(bad).is_err());
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let mut bad = args();
        bad.pool_size = 0;
        assert!(NodeConfig::try_from(bad).is_err());
    }

    #[test]
    fn optional_knobs_map_through() {
        let mut full = args();
        full.requests_per_worker = 10;
        full.request_timeout_ms = 1_000;
        full.no_requeue = true;
        full.fail_every = 7;
        let config = NodeConfig::try_from(full).unwrap();
        assert_eq!(
            config.options.requests_per_worker,
            Some(NonZeroUsize::new(10).unwrap())
        );
        assert_eq!(config.options.request_timeout, Some(Duration::from_secs(1)));
        assert!(!config.options.requeue_on_failure);
        assert_eq!(config.fail_every, Some(7));
    }
}
