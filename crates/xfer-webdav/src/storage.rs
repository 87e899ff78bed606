//! Catalog of top-level storages that are backed by object storage.

use crate::client::WebDavClient;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::Mutex;
use xfer_core::FsItem;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageEntry {
    name: String,
    #[serde(default)]
    object_storage: bool,
}

/// Fetched lazily; a failed fetch is retried on the next root listing.
pub struct ObjectStorageCatalog {
    endpoint: String,
    client: WebDavClient,
    cache: Mutex<Option<HashMap<String, bool>>>,
}

impl ObjectStorageCatalog {
    pub fn new(client: WebDavClient, extra_api_url: &str) -> Self {
        Self {
            endpoint: format!("{}/storages", extra_api_url.trim_end_matches('/')),
            client,
            cache: Mutex::new(None),
        }
    }

    async fn entries(&self) -> Option<HashMap<String, bool>> {
        let mut cache = self.cache.lock().await;
        if let Some(map) = cache.as_ref() {
            return Some(map.clone());
        }
        match self.client.get_json::<Vec<StorageEntry>>(&self.endpoint).await {
            Ok(entries) => {
                let map: HashMap<String, bool> =
                    entries.into_iter().map(|e| (e.name, e.object_storage)).collect();
                *cache = Some(map.clone());
                Some(map)
            }
            Err(e) => {
                log::warn!("object-storage catalog unavailable: {}", e);
                None
            }
        }
    }

    /// Flag top-level directories listed in the catalog.
    pub async fn decorate(&self, items: &mut [FsItem]) {
        let Some(map) = self.entries().await else {
            return;
        };
        for item in items.iter_mut().filter(|i| i.is_directory) {
            if let Some(flag) = map.get(&item.name) {
                item.is_object_storage = Some(*flag);
            }
        }
    }
}
