//! Configured backends and their coalesced listing session.

use crate::error::FsResult;
use crate::interface::FileSystemInterface;
use crate::last_request::LastRequestSlot;
use crate::types::{AdapterOptions, AdapterType, FsItem};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One lazily connected interface shared by "last-request-only" calls.
#[derive(Default)]
pub struct LastRequestSession {
    slot: LastRequestSlot,
    interface: Mutex<Option<Arc<dyn FileSystemInterface>>>,
}

impl LastRequestSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self) -> &LastRequestSlot {
        &self.slot
    }

    pub async fn get_or_connect<F, Fut>(&self, connect: F) -> FsResult<Arc<dyn FileSystemInterface>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FsResult<Arc<dyn FileSystemInterface>>>,
    {
        let mut guard = self.interface.lock().await;
        if let Some(interface) = guard.as_ref() {
            return Ok(interface.clone());
        }
        let interface = connect().await?;
        *guard = Some(interface.clone());
        Ok(interface)
    }

    /// Drop the cached interface so the next call reconnects.
    pub async fn invalidate(&self) {
        let stale = self.interface.lock().await.take();
        if let Some(interface) = stale {
            interface.destroy().await;
        }
    }

    /// Like [`invalidate`](Self::invalidate), but only while `used` is
    /// still the cached interface.
    pub async fn retire(&self, used: &Arc<dyn FileSystemInterface>) {
        let stale = {
            let mut guard = self.interface.lock().await;
            match guard.as_ref() {
                Some(current) if Arc::ptr_eq(current, used) => guard.take(),
                _ => None,
            }
        };
        if let Some(interface) = stale {
            interface.destroy().await;
        }
    }

    pub async fn destroy(&self) {
        self.slot.cancel_all();
        self.invalidate().await;
    }
}

/// Describes one configured backend and creates sessions for it.
#[async_trait]
pub trait FileSystemAdapter: Send + Sync {
    fn options(&self) -> &AdapterOptions;

    fn identifier(&self) -> &str {
        self.options().identifier()
    }

    fn name(&self) -> &str {
        self.options().name()
    }

    fn adapter_type(&self) -> AdapterType {
        self.options().adapter_type()
    }

    fn path_separator(&self) -> char {
        '/'
    }

    /// Open a fresh session. Callers own it and must `destroy` it.
    async fn create_interface(&self) -> FsResult<Arc<dyn FileSystemInterface>>;

    fn last_request_session(&self) -> &LastRequestSession;

    /// List `dir` through the shared session; a newer call with the same
    /// `name` supersedes this one, which then yields `Ok(None)`.
    ///
    /// A superseded listing is cut off mid-flight, so the session it ran on
    /// is retired along with sessions that lost their connection.
    async fn list_last_request(&self, name: &str, dir: &str) -> FsResult<Option<Vec<FsItem>>> {
        let session = self.last_request_session();
        let interface = session.get_or_connect(|| self.create_interface()).await?;
        let result = session.slot().run(name, interface.list(dir)).await;
        match &result {
            Ok(None) => {
                log::debug!("{}: listing of {} superseded; retiring its session", self.identifier(), dir);
                session.retire(&interface).await;
            }
            Err(e) if e.is_connectivity() => {
                log::debug!("{}: dropping listing session after {}", self.identifier(), e);
                session.retire(&interface).await;
            }
            _ => {}
        }
        result
    }

    /// Release every session this adapter still holds.
    async fn destroy(&self) {
        self.last_request_session().destroy().await;
    }
}
