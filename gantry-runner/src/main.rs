//! Gantry runner process
//!
//! Wires configuration, the capability-backed executor registry, the
//! processor, and the worker pool together, then runs until interrupted.
//! Shutdown cancels the process token, closes the queue, and waits for
//! every worker to finish.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gantry_runner::executor::default_registry;
use gantry_runner::{ChannelQueue, Config, JobQueue, MultiWorkerConsumer, PipelineProcessor};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gantry_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    info!(
        work_dir = %config.work_dir.display(),
        workers = config.workers,
        queue_cap = config.queue_cap,
        "starting gantry runner"
    );

    let shutdown = CancellationToken::new();
    let queue: Arc<dyn JobQueue> = Arc::new(ChannelQueue::new(config.queue_cap));

    let registry = default_registry(&config.container_bin, &config.git_bin, config.workers);
    let processor = Arc::new(PipelineProcessor::new(config.work_dir.clone(), registry));

    let consumer = MultiWorkerConsumer::new(config.workers);
    let consume = {
        let token = shutdown.clone();
        let queue = queue.clone();
        let processor = processor.clone();
        tokio::spawn(async move { consumer.consume(token, queue, processor).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for the shutdown signal")?;

    info!("shutdown signal received, draining workers");
    shutdown.cancel();
    queue.close();

    consume.await.context("worker pool task failed")?;
    info!("gantry runner stopped");
    Ok(())
}
