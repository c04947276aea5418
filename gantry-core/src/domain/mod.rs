//! Core domain types
//!
//! These types represent the fundamental entities shared between the
//! execution engine and any transport built on top of it: the submitted
//! pipeline, its typed steps, and the live progress records mutated by the
//! processor while a build runs.

pub mod log;
pub mod pipeline;
pub mod progress;
