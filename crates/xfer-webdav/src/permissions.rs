//! Best-effort ownership fix-ups after writes and directory creation.
//!
//! Paths are queued by the interface and delivered by one background
//! worker per adapter: debounced, batched, retried with back-off. Failures
//! are logged and never reach the caller that triggered them.

use crate::client::WebDavClient;
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct PermissionSyncSettings {
    /// Quiet period that closes a batch.
    pub debounce: Duration,
    pub max_batch: usize,
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for PermissionSyncSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            max_batch: 100,
            attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Serialize)]
struct PermissionRequest<'a> {
    paths: &'a [String],
}

struct Worker {
    tx: mpsc::UnboundedSender<String>,
    handle: JoinHandle<()>,
}

pub struct PermissionSync {
    endpoint: String,
    client: WebDavClient,
    settings: PermissionSyncSettings,
    worker: Mutex<Option<Worker>>,
}

impl PermissionSync {
    /// `api_url` is the companion API root; batches go to `{api_url}/permissions`.
    pub fn new(client: WebDavClient, api_url: &str, settings: PermissionSyncSettings) -> Self {
        Self {
            endpoint: format!("{}/permissions", api_url.trim_end_matches('/')),
            client,
            settings,
            worker: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Queue `path`. Spawns the worker on first use and replaces one that
    /// has stopped.
    pub fn notify(&self, path: &str) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        let path = match worker.as_ref() {
            Some(w) => match w.tx.send(path.to_string()) {
                Ok(()) => return,
                Err(mpsc::error::SendError(path)) => {
                    debug!("permission sync worker stopped; restarting it for {}", path);
                    path
                }
            },
            None => path.to_string(),
        };
        let fresh = self.spawn_worker();
        if let Err(e) = fresh.tx.send(path) {
            debug!("permission update for {} dropped: worker exited at start", e.0);
        }
        *worker = Some(fresh);
    }

    fn spawn_worker(&self) -> Worker {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(
            rx,
            self.client.clone(),
            self.endpoint.clone(),
            self.settings.clone(),
        ));
        Worker { tx, handle }
    }

    /// Deliver whatever is queued, then stop the worker.
    pub async fn shutdown(&self) {
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(Worker { tx, handle }) = worker {
            drop(tx);
            if let Err(e) = handle.await {
                warn!("permission sync worker ended abnormally: {}", e);
            }
        }
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<String>,
    client: WebDavClient,
    endpoint: String,
    settings: PermissionSyncSettings,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = BTreeSet::new();
        batch.insert(first);
        while batch.len() < settings.max_batch {
            match tokio::time::timeout(settings.debounce, rx.recv()).await {
                Ok(Some(path)) => {
                    batch.insert(path);
                }
                Ok(None) | Err(_) => break,
            }
        }
        let paths: Vec<String> = batch.into_iter().collect();
        deliver(&client, &endpoint, &paths, &settings).await;
    }
    debug!("permission sync worker for {} stopped", endpoint);
}

async fn deliver(client: &WebDavClient, endpoint: &str, paths: &[String], settings: &PermissionSyncSettings) {
    for attempt in 0..settings.attempts {
        match client.post_json(endpoint, &PermissionRequest { paths }).await {
            Ok(()) => {
                debug!("permissions updated for {} path(s)", paths.len());
                return;
            }
            Err(e) => {
                warn!(
                    "permission update attempt {}/{} failed: {}",
                    attempt + 1,
                    settings.attempts,
                    e
                );
                if attempt + 1 < settings.attempts {
                    tokio::time::sleep(settings.backoff * 2u32.pow(attempt)).await;
                }
            }
        }
    }
    warn!("giving up on permission update for {} path(s)", paths.len());
}
