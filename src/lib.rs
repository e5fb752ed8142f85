#![forbid(unsafe_code)]

pub mod channel;
pub mod config;
pub mod config_watcher;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod sink;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
