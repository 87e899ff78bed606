//! Configured adapters keyed by identifier.

use crate::error::{OpResult, OperationError};
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::Arc;
use xfer_core::{AdapterOptions, FileSystemAdapter, FsError, FsResult};
use xfer_ftp::FtpAdapter;
use xfer_local::LocalAdapter;
use xfer_webdav::WebdavAdapter;

#[derive(Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn FileSystemAdapter>>,
}

/// Instantiate the adapter described by `options`.
pub fn build_adapter(options: &AdapterOptions) -> FsResult<Arc<dyn FileSystemAdapter>> {
    let adapter: Arc<dyn FileSystemAdapter> = match options {
        AdapterOptions::Local(o) => Arc::new(LocalAdapter::new(o.clone())),
        AdapterOptions::Webdav(o) => Arc::new(WebdavAdapter::new(o.clone())?),
        AdapterOptions::Ftp(o) => Arc::new(FtpAdapter::new(o.clone())?),
    };
    Ok(adapter)
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_options(options: &[AdapterOptions]) -> FsResult<Self> {
        let mut registry = Self::new();
        for o in options {
            registry.insert(build_adapter(o)?)?;
        }
        info!("registered {} file system(s)", registry.adapters.len());
        Ok(registry)
    }

    /// Add an adapter; identifiers are unique.
    pub fn insert(&mut self, adapter: Arc<dyn FileSystemAdapter>) -> FsResult<()> {
        let id = adapter.identifier().to_string();
        if id.is_empty() {
            return Err(FsError::invalid_config("file system without identifier"));
        }
        if self.adapters.contains_key(&id) {
            return Err(FsError::invalid_config(format!("duplicate file system '{}'", id)));
        }
        debug!("registered {} ({:?})", id, adapter.adapter_type());
        self.adapters.insert(id, adapter);
        Ok(())
    }

    pub fn get(&self, identifier: &str) -> OpResult<Arc<dyn FileSystemAdapter>> {
        self.adapters
            .get(identifier)
            .cloned()
            .ok_or_else(|| OperationError::UnknownAdapter(identifier.to_string()))
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Release every adapter's shared sessions.
    pub async fn destroy(&self) {
        for adapter in self.adapters.values() {
            adapter.destroy().await;
        }
    }
}
