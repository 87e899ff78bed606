//! Deserializable engine configuration.
//!
//! Reading the file is the caller's job; this module only parses and
//! validates what it is handed.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use xfer_core::{AdapterOptions, FsError, FsResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default)]
    pub file_systems: Vec<AdapterOptions>,
    #[serde(default)]
    pub operations: OperationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationsConfig {
    /// Root of the per-operation recovery directories.
    #[serde(default = "default_info_directory")]
    pub info_directory: PathBuf,
    /// Attempts per item before it is abandoned for the current pass.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Extra passes over failed items, each gated by a retry confirmation.
    #[serde(default = "default_iterations_count")]
    pub iterations_count: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            info_directory: default_info_directory(),
            max_attempts: default_max_attempts(),
            iterations_count: default_iterations_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl OperationsConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn default_info_directory() -> PathBuf {
    std::env::temp_dir().join("xfer-operations")
}

fn default_max_attempts() -> u32 {
    5
}

fn default_iterations_count() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

impl Configuration {
    pub fn from_json(text: &str) -> FsResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| FsError::invalid_config(format!("configuration JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> FsResult<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| FsError::invalid_config(format!("configuration YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Identifiers must be non-empty and unique; remote adapters need a URL.
    pub fn validate(&self) -> FsResult<()> {
        let mut seen = HashSet::new();
        for options in &self.file_systems {
            let id = options.identifier();
            if id.trim().is_empty() {
                return Err(FsError::invalid_config("file system without identifier"));
            }
            if !seen.insert(id) {
                return Err(FsError::invalid_config(format!("duplicate file system '{}'", id)));
            }
            let url = match options {
                AdapterOptions::Local(_) => continue,
                AdapterOptions::Webdav(o) => &o.url,
                AdapterOptions::Ftp(o) => &o.url,
            };
            if url.trim().is_empty() {
                return Err(FsError::invalid_config(format!("'{}' has no url", id)));
            }
        }
        if self.operations.max_attempts == 0 {
            return Err(FsError::invalid_config("operations.maxAttempts must be at least 1"));
        }
        Ok(())
    }
}
