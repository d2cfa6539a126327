//! lockbox-core - Shared functionality for the lockbox secret manager
//!
//! Configuration store, path discovery, subprocess and terminal helpers.

pub mod config;
pub mod format;
pub mod paths;
pub mod process;

pub use config::{Config, ConfigError};
pub use paths::Paths;
