use crate::interface::LocalInterface;
use async_trait::async_trait;
use std::sync::Arc;
use xfer_core::{AdapterOptions, FileSystemAdapter, FileSystemInterface, FsResult, LastRequestSession, LocalOptions};

pub struct LocalAdapter {
    options: AdapterOptions,
    session: LastRequestSession,
}

impl LocalAdapter {
    pub fn new(options: LocalOptions) -> Self {
        Self {
            options: AdapterOptions::Local(options),
            session: LastRequestSession::new(),
        }
    }

    /// Adapter with the given identifier and no display name.
    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self::new(LocalOptions {
            identifier: identifier.into(),
            name: None,
        })
    }
}

#[async_trait]
impl FileSystemAdapter for LocalAdapter {
    fn options(&self) -> &AdapterOptions {
        &self.options
    }

    fn path_separator(&self) -> char {
        std::path::MAIN_SEPARATOR
    }

    async fn create_interface(&self) -> FsResult<Arc<dyn FileSystemInterface>> {
        Ok(Arc::new(LocalInterface::new(self.identifier())))
    }

    fn last_request_session(&self) -> &LastRequestSession {
        &self.session
    }
}
