use crate::client::{Upload, WebDavClient};
use crate::permissions::PermissionSync;
use crate::storage::ObjectStorageCatalog;
use crate::xml::{DavResource, Depth};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use xfer_core::path::{file_name, normalize};
use xfer_core::{ByteSink, ByteStream, CoalescedLog, FileSystemInterface, FsError, FsItem, FsResult};

/// State shared by an adapter and every interface it creates.
pub struct WebdavShared {
    pub client: WebDavClient,
    pub permissions: Option<PermissionSync>,
    pub catalog: Option<ObjectStorageCatalog>,
    pub restricted: bool,
}

impl WebdavShared {
    fn touched(&self, path: &str) {
        if let Some(sync) = &self.permissions {
            sync.notify(path);
        }
    }
}

pub struct WebdavInterface {
    identifier: String,
    shared: Arc<WebdavShared>,
}

impl WebdavInterface {
    pub fn new(identifier: impl Into<String>, shared: Arc<WebdavShared>) -> Self {
        Self {
            identifier: identifier.into(),
            shared,
        }
    }

    fn to_item(&self, resource: &DavResource) -> FsItem {
        let path = self.shared.client.path_from_href(&resource.href);
        let name = resource
            .display_name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| file_name('/', &path))
            .unwrap_or_else(|| "/".to_string());
        let changed = resource
            .last_modified
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc2822(raw).ok())
            .map(|d| d.with_timezone(&Utc));
        let item = if resource.is_collection {
            FsItem::directory(name, path)
        } else {
            FsItem::file(name, path, resource.content_length)
        };
        item.with_changed(changed)
    }

    async fn stat(&self, path: &str) -> FsResult<Option<DavResource>> {
        match self.shared.client.propfind(path, Depth::Zero).await {
            Ok(resources) => Ok(resources.into_iter().next()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn guard_removal(&self, path: &str) -> FsResult<()> {
        if self.shared.restricted && self.path_components(path).len() <= 1 {
            return Err(FsError::permission_denied("top-level entries cannot be removed").with_path(path));
        }
        Ok(())
    }
}

#[async_trait]
impl FileSystemInterface for WebdavInterface {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn list_entries(&self, dir: &str) -> FsResult<Vec<FsItem>> {
        let resources = self.shared.client.propfind(dir, Depth::One).await?;
        let own = normalize('/', dir);
        let own = if own.is_empty() { "/".to_string() } else { own };
        let mut items = Vec::with_capacity(resources.len());
        for resource in &resources {
            let path = self.shared.client.path_from_href(&resource.href);
            if path == own {
                if !resource.is_collection {
                    return Err(FsError::conflict("not a directory").with_path(dir));
                }
                continue;
            }
            // Display names are unreliable for listings; use the href leaf.
            let mut item = self.to_item(&DavResource {
                display_name: None,
                ..resource.clone()
            });
            if self.is_root(dir) && self.shared.restricted {
                item.removable = Some(false);
            }
            items.push(item);
        }
        if self.is_root(dir) {
            if let Some(catalog) = &self.shared.catalog {
                catalog.decorate(&mut items).await;
            }
        }
        Ok(items)
    }

    async fn is_directory(&self, path: &str) -> FsResult<bool> {
        Ok(self.stat(path).await?.map_or(false, |r| r.is_collection))
    }

    async fn is_file(&self, path: &str) -> FsResult<bool> {
        Ok(self.stat(path).await?.map_or(false, |r| !r.is_collection))
    }

    async fn exists(&self, path: &str) -> FsResult<bool> {
        Ok(self.stat(path).await?.is_some())
    }

    async fn file_info(&self, path: &str) -> FsResult<Option<FsItem>> {
        let resources = self.shared.client.propfind(path, Depth::Zero).await?;
        Ok(resources.first().map(|r| {
            let mut item = self.to_item(&DavResource {
                display_name: None,
                ..r.clone()
            });
            item.path = path.to_string();
            item
        }))
    }

    async fn make_directory(&self, path: &str) -> FsResult<()> {
        self.shared.client.mkcol(path).await?;
        self.shared.touched(path);
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> FsResult<()> {
        self.guard_removal(path)?;
        self.shared.client.delete(path, false).await
    }

    async fn remove_directory(&self, path: &str) -> FsResult<()> {
        self.guard_removal(path)?;
        self.shared.client.delete(path, true).await
    }

    async fn create_read_stream(&self, path: &str) -> FsResult<ByteStream> {
        self.shared.client.get_stream(path).await
    }

    async fn create_write_stream(&self, path: &str, size: Option<u64>) -> FsResult<Box<dyn ByteSink>> {
        let upload = self.shared.client.put_stream(path, size)?;
        Ok(Box::new(WebdavSink {
            upload,
            shared: self.shared.clone(),
            written: 0,
            size,
            progress: CoalescedLog::per_second(log::Level::Debug),
        }))
    }
}

struct WebdavSink {
    upload: Upload,
    shared: Arc<WebdavShared>,
    written: u64,
    size: Option<u64>,
    progress: CoalescedLog,
}

#[async_trait]
impl ByteSink for WebdavSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> FsResult<()> {
        let len = chunk.len() as u64;
        self.upload.send(chunk).await?;
        self.written += len;
        let line = match self.size {
            Some(total) => format!("PUT {}: {}/{} bytes", self.upload.path(), self.written, total),
            None => format!("PUT {}: {} bytes", self.upload.path(), self.written),
        };
        self.progress.log(line);
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> FsResult<()> {
        self.progress.flush();
        self.upload.complete().await?;
        self.shared.touched(self.upload.path());
        Ok(())
    }

    async fn abort(self: Box<Self>) {
        let WebdavSink { upload, .. } = *self;
        log::debug!("aborting upload of {}", upload.path());
        upload.cancel().await;
    }
}
