//! Configuration management for vidqueue
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use vidqueue::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Downloading into: {}", config.downloads.output_dir.display());
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `VIDQUEUE__<section>__<key>`
//!
//! Examples:
//! - `VIDQUEUE__SERVER__BIND_ADDR=127.0.0.1:9000`
//! - `VIDQUEUE__DOWNLOADS__OUTPUT_DIR=/srv/media`
//! - `VIDQUEUE__SERVER__MAX_PAYLOAD_BYTES=2MB`
//!
//! `DEFAULT_DOWNLOAD_DIR` is still honoured and wins over everything else
//! for `downloads.output_dir`.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/vidqueue.toml`.
//! This can be overridden using the `VIDQUEUE_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    CleanupConfig, Config, DownloadsConfig, RunnerConfig, SCRATCH_DIR_NAME, ServerConfig,
    YtDlpConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or a value
    /// fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_path(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints the types cannot express
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate(self)
    }
}
