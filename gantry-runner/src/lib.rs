//! Gantry Runner
//!
//! The execution engine of the Gantry CI system:
//! - A bounded queue decoupling submission from execution
//! - A worker pool where each worker owns one pipeline's full lifecycle
//! - The pipeline processor: state machine, progress table, and the
//!   control operations (init, progress, log, stop, delete) transports
//!   call into
//! - Four step executors behind one trait: source checkout, containerized
//!   shell, image build, and embedded Lua scripting
//! - The line-buffering job log multiplexer feeding the per-job log file
//!   and the live console together
//!
//! Network transports are not part of this crate; they are expected to
//! consume the processor and queue through this library surface.

pub mod config;
pub mod consumer;
pub mod container;
pub mod executor;
pub mod joblog;
pub mod processor;
pub mod queue;

pub use config::Config;
pub use consumer::{MessageProcessor, MultiWorkerConsumer};
pub use processor::{PipelineProcessor, ProcessorError};
pub use queue::{ChannelQueue, JobQueue, Message, QueueError};
