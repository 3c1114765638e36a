//! Configuration for caskstore
//!
//! The store is configured by its root directory and nothing else.

use std::path::PathBuf;

use crate::error::{CaskError, Result};

/// Main configuration for a store instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all store files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── lock                                        (advisory lock file)
    ///     └── {sequence:020}-{unix_millis:020}.dat        (segment files)
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./caskstore_data"),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the configuration before a store is opened with it
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(CaskError::Config("data_dir must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
