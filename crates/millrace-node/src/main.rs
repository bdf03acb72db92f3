#![doc = include_str!("../README.md")]

mod config;
mod telemetry;
mod workload;

use clap::Parser;
use config::{CliArgs, NodeConfig};
use millrace::{ChannelTransport, Dispatcher, MetricsCollector};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use workload::{DemoFactory, LogSink};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = NodeConfig::try_from(args)?;

    telemetry::init_tracing();
    log_startup_info(&config);

    let (producer, transport) = ChannelTransport::bounded(config.queue_capacity);
    let transport = Arc::new(transport);
    let dispatcher = Dispatcher::new(
        config.options.clone(),
        transport,
        DemoFactory::new(config.work, config.fail_every),
    )?;

    let metrics_token = CancellationToken::new();
    let collector = MetricsCollector::new(
        dispatcher.stats(),
        Arc::new(LogSink),
        config.metrics_interval,
    );
    let metrics_task = tokio::spawn(collector.run(metrics_token.clone()));

    let produce_token = CancellationToken::new();
    let producer_task = tokio::spawn(workload::produce(
        producer,
        config.produce_every,
        produce_token.clone(),
    ));

    dispatcher.start()?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Stop feeding new work
    produce_token.cancel();
    if let Err(error) = producer_task.await {
        tracing::error!(%error, "producer task failed");
    }

    // 2. Drain the dispatcher
    let report = dispatcher.shutdown(config.drain_timeout).await;

    // 3. Flush a final metrics sample
    metrics_token.cancel();
    if let Err(error) = metrics_task.await {
        tracing::error!(%error, "metrics task failed");
    }

    tracing::info!(
        drained = report.drained,
        force_cancelled = report.force_cancelled,
        "Node shut down successfully"
    );
    Ok(())
}

fn log_startup_info(config: &NodeConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting node with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting node {} with {} workers",
            config.options.node_name,
            config.options.pool_size
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
