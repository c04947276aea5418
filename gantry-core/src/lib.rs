//! Gantry Core
//!
//! Core types for the Gantry CI executor.
//!
//! This crate contains:
//! - Domain types: pipelines, steps, progress records, log records
//! - The process environment (`ProcessCtx`) threaded across a pipeline's
//!   steps, with `${NAME}` template rendering

pub mod domain;
pub mod env;

pub use env::{ProcessCtx, SharedEnv};
