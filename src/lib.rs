// dfs-cache library

pub mod cache;
pub mod config;
pub mod constants;
pub mod dfs;
pub mod error;
pub mod logging;
pub mod metrics; // Prometheus metrics
pub mod sync;
