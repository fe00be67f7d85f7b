//! KDL configuration parsing for the Carpenter build worker.
//!
//! The worker reads a single `carpenter.kdl` file describing concurrency,
//! directories, retry policies, purge schedule, status reporting and the
//! local backends.

pub mod error;
pub mod worker;

pub use error::{ConfigError, ConfigResult};
pub use worker::{
    HttpConfig, PublishConfig, PurgeConfig, StatusConfig, TarballConfig, WorkerConfig,
    load_worker_config, parse_worker_config,
};
