//! Worker-pool consumer
//!
//! The only source of cross-pipeline parallelism: a fixed number of
//! workers drain the queue, and each worker owns one pipeline's full
//! lifecycle at a time. A processor returning `true` asks for the message
//! to be requeued.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::queue::{JobQueue, Message};

/// Execution entry point the consumer drives for every popped message
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Processes one message; the returned flag requests a requeue
    async fn run(&self, token: CancellationToken, msg: Message) -> bool;
}

/// Fixed-size pool of queue-draining workers
pub struct MultiWorkerConsumer {
    workers: usize,
}

impl MultiWorkerConsumer {
    pub fn new(workers: usize) -> Self {
        Self { workers }
    }

    /// Runs the pool until the queue closes or the token is cancelled;
    /// every worker is joined before this returns
    pub async fn consume(
        &self,
        token: CancellationToken,
        queue: Arc<dyn JobQueue>,
        processor: Arc<dyn MessageProcessor>,
    ) {
        let mut workers = JoinSet::new();

        for worker_id in 0..self.workers {
            let token = token.clone();
            let queue = queue.clone();
            let processor = processor.clone();

            workers.spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => {
                            debug!(worker_id, "worker stopping on cancellation");
                            break;
                        }
                        popped = queue.pop() => {
                            let msg = match popped {
                                Ok(msg) => msg,
                                Err(e) => {
                                    debug!(worker_id, reason = %e, "worker stopping");
                                    break;
                                }
                            };

                            if processor.run(token.clone(), msg.clone()).await {
                                if let Err(e) = queue.push(msg) {
                                    error!(worker_id, error = %e, "failed to requeue message");
                                }
                            }
                        }
                    }
                }
            });
        }

        while workers.join_next().await.is_some() {}
    }
}
