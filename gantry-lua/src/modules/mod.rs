//! Host capability modules exposed to scripts
//!
//! Each module is generic over a small host trait so the executor and the
//! tests can plug in their own ends: logging goes to the job log, the
//! environment bridge reads and writes the pipeline's shared environment,
//! and HTTP calls go through the host's outbound client.

pub mod env;
pub mod http;
pub mod json;
pub mod log;

pub use env::{EnvBridge, EnvModule};
pub use http::{HttpBridge, HttpExchange, HttpModule};
pub use json::JsonModule;
pub use log::{LogModule, ScriptLogSink};
