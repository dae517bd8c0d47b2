// TrellisDB - multi-index transactional storage and query engine core
// Core library module

pub mod common;
pub mod driver;
pub mod error;
pub mod execution;
pub mod lockmap;
pub mod merge;
pub mod param;
pub mod schema;
pub mod server;
pub mod transaction;

pub use error::{DbError, Result};

use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,
    pub page_size: usize,
    pub worker_count: usize,
    /// Quiet time before a deferred-update entry may merge.
    pub merge_interval: Duration,
    /// Merge daemon wake-up poll.
    pub merge_poll: Duration,
    /// Lock deadline for background merges.
    pub merge_lock_timeout: Duration,
    /// Lock deadline for foreground statements.
    pub statement_lock_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            page_size: 4096,
            worker_count: num_cpus::get(),
            merge_interval: Duration::from_secs(30),
            merge_poll: Duration::from_millis(500),
            merge_lock_timeout: Duration::from_secs(1),
            statement_lock_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn merge_config(&self) -> merge::MergeConfig {
        merge::MergeConfig {
            interval: self.merge_interval,
            poll: self.merge_poll,
            lock_timeout: self.merge_lock_timeout,
        }
    }
}

/// Install a default fmt subscriber. Call once from binaries and test
/// harnesses that want log output.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
