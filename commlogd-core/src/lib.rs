//! Core infrastructure layer for commlogd.
//!
//! Provides configuration, logging, and error handling shared by the
//! domain layer and the daemon binary.

pub mod config;
pub mod error;
pub mod logging;

pub use config::StorageConfig;
pub use error::{ConfigError, CoreError};
