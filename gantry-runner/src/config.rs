//! Runner configuration
//!
//! Parsed once at startup from flags or environment variables.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "gantry-runner", about = "CI pipeline executor")]
pub struct Config {
    /// Root directory job directories are created under
    #[arg(long, env = "GANTRY_WORK_DIR", default_value = "/tmp")]
    pub work_dir: PathBuf,

    /// Bounded capacity of the build queue
    #[arg(long, env = "GANTRY_QUEUE_CAP", default_value_t = 1000)]
    pub queue_cap: usize,

    /// Number of concurrent pipeline workers
    #[arg(long, env = "GANTRY_WORKERS", default_value_t = 5)]
    pub workers: usize,

    /// Docker-compatible container CLI binary
    #[arg(long, env = "GANTRY_CONTAINER_BIN", default_value = "docker")]
    pub container_bin: String,

    /// Git binary used for source checkouts
    #[arg(long, env = "GANTRY_GIT_BIN", default_value = "git")]
    pub git_bin: String,
}
