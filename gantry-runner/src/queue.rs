//! Bounded build queue
//!
//! Decouples submission from execution: transports push [`Message`]s, the
//! worker pool pops them. Pushing never blocks (a full queue is an error
//! the submitter sees immediately); popping awaits until a message arrives
//! or the queue is closed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;

use gantry_core::domain::pipeline::Pipeline;

/// Queue envelope: an opaque identifier plus a JSON payload
///
/// The payload is expected to deserialize to a [`Pipeline`]; the processor
/// validates that at execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub payload: serde_json::Value,
}

impl Message {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// Wraps a pipeline for submission
    pub fn pipeline(id: impl Into<String>, pipeline: &Pipeline) -> serde_json::Result<Self> {
        Ok(Self::new(id, serde_json::to_value(pipeline)?))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full")]
    Full,
    #[error("queue is closed")]
    Closed,
}

/// Queue contract shared by transports and the worker pool
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues without blocking; fails with [`QueueError::Full`] past
    /// capacity and [`QueueError::Closed`] after close
    fn push(&self, msg: Message) -> Result<(), QueueError>;

    /// Dequeues the oldest message, awaiting until one is available;
    /// fails with [`QueueError::Closed`] once the queue is closed
    async fn pop(&self) -> Result<Message, QueueError>;

    /// Idempotently stops the queue and unblocks every waiting popper
    fn close(&self);
}

/// In-memory FIFO queue
///
/// The semaphore's permit count mirrors the buffer length; poppers sleep
/// on `acquire`, and `Semaphore::close` wakes all of them on close.
pub struct ChannelQueue {
    capacity: usize,
    buffer: Mutex<VecDeque<Message>>,
    ready: Semaphore,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::new()),
            ready: Semaphore::new(0),
        }
    }
}

#[async_trait]
impl JobQueue for ChannelQueue {
    fn push(&self, msg: Message) -> Result<(), QueueError> {
        if self.ready.is_closed() {
            return Err(QueueError::Closed);
        }

        let mut buffer = self.buffer.lock().expect("queue lock");
        if buffer.len() >= self.capacity {
            return Err(QueueError::Full);
        }

        debug!(msg_id = %msg.id, "message pushed");
        buffer.push_back(msg);
        self.ready.add_permits(1);
        Ok(())
    }

    async fn pop(&self) -> Result<Message, QueueError> {
        let permit = self.ready.acquire().await.map_err(|_| QueueError::Closed)?;
        permit.forget();

        self.buffer
            .lock()
            .expect("queue lock")
            .pop_front()
            .ok_or(QueueError::Closed)
    }

    fn close(&self) {
        debug!("queue closed");
        self.ready.close();
    }
}
