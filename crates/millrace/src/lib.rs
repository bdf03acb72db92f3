#![doc = include_str!("../README.md")]

mod dispatch;
mod error;
mod metrics;
mod options;
mod request;
mod transport;
mod worker;

pub use dispatch::{Dispatcher, DrainReport, InflightSnapshot, ProcessingRequestInfo};
pub use error::{Error, Result};
pub use metrics::{EngineStats, MetricsCollector, MetricsSink, StatsSnapshot, names};
pub use options::NodeOptions;
pub use request::{AckHandle, Delivery, Request, RequestTags};
pub use transport::{ChannelTransport, Producer, Transport};
pub use worker::{Outcome, Worker, WorkerContext, WorkerFactory};
