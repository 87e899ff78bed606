use crate::client::WebDavClient;
use crate::interface::{WebdavInterface, WebdavShared};
use crate::permissions::{PermissionSync, PermissionSyncSettings};
use crate::storage::ObjectStorageCatalog;
use async_trait::async_trait;
use std::sync::Arc;
use xfer_core::{
    AdapterOptions, FileSystemAdapter, FileSystemInterface, FsError, FsResult, LastRequestSession, WebdavOptions,
};

pub struct WebdavAdapter {
    options: AdapterOptions,
    session: LastRequestSession,
    shared: Arc<WebdavShared>,
}

impl WebdavAdapter {
    pub fn new(options: WebdavOptions) -> FsResult<Self> {
        Self::with_permission_settings(options, PermissionSyncSettings::default())
    }

    pub fn with_permission_settings(options: WebdavOptions, settings: PermissionSyncSettings) -> FsResult<Self> {
        let client = WebDavClient::new(&options)?;
        let permissions = match (options.update_permissions, options.api_url.as_deref()) {
            (true, Some(api)) => Some(PermissionSync::new(client.clone(), api, settings)),
            (true, None) => {
                return Err(FsError::invalid_config(format!(
                    "'{}': updatePermissions requires apiURL",
                    options.identifier
                )))
            }
            (false, _) => None,
        };
        let catalog = options
            .extra_api_url
            .as_deref()
            .map(|extra| ObjectStorageCatalog::new(client.clone(), extra));
        let shared = Arc::new(WebdavShared {
            client,
            permissions,
            catalog,
            restricted: options.restricted,
        });
        Ok(Self {
            options: AdapterOptions::Webdav(options),
            session: LastRequestSession::new(),
            shared,
        })
    }
}

#[async_trait]
impl FileSystemAdapter for WebdavAdapter {
    fn options(&self) -> &AdapterOptions {
        &self.options
    }

    async fn create_interface(&self) -> FsResult<Arc<dyn FileSystemInterface>> {
        Ok(Arc::new(WebdavInterface::new(self.identifier(), self.shared.clone())))
    }

    fn last_request_session(&self) -> &LastRequestSession {
        &self.session
    }

    async fn destroy(&self) {
        self.session.destroy().await;
        if let Some(sync) = &self.shared.permissions {
            sync.shutdown().await;
        }
    }
}
