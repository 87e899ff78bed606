//! FTP/FTPS session exposed as a [`FileSystemInterface`].
//!
//! One control connection per interface, guarded by an async mutex. Open
//! read and write streams hold the guard until they are finished, so
//! calls on the same interface are strictly sequential.

use crate::ftp::client::FtpClient;
use crate::ftp::parser::{EntryKind, ListingEntry};
use crate::ftp::transfer::DataStream;
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn, Level};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::sync::{Mutex, OwnedMutexGuard};
use xfer_core::abortable::with_timeout;
use xfer_core::path::{file_name, join_path};
use xfer_core::{ByteSink, ByteStream, CoalescedLog, FileSystemInterface, FsError, FsItem, FsResult, FtpOptions};

/// Sessions idle for longer than this are pinged with `NOOP` first.
const STALE_AFTER: Duration = Duration::from_secs(15);

#[derive(Default)]
pub struct FtpConnection {
    client: Option<FtpClient>,
    /// A transfer's closing reply has not been read yet.
    pending_reply: bool,
}

impl FtpConnection {
    fn client(&mut self) -> FsResult<&mut FtpClient> {
        self.client
            .as_mut()
            .ok_or_else(|| FsError::disconnected("FTP session is not connected"))
    }
}

/// Run `$call` against a ready client, reconnecting once when the
/// session turns out to be dead.
macro_rules! with_client {
    ($self:ident, $client:ident => $call:expr) => {{
        let mut retried = false;
        loop {
            let mut conn = $self.ready().await?;
            let $client = conn.client()?;
            match $call.await {
                Err(e) if e.is_connectivity() && !retried => {
                    debug!("{}: {}; reconnecting", $self.identifier, e);
                    retried = true;
                }
                other => break other,
            }
        }
    }};
}

pub struct FtpInterface {
    identifier: String,
    options: FtpOptions,
    connection: Arc<Mutex<FtpConnection>>,
}

impl FtpInterface {
    /// Connect eagerly so configuration and credential errors surface here.
    pub async fn connect(identifier: impl Into<String>, options: FtpOptions) -> FsResult<Self> {
        let client = FtpClient::connect(&options).await?;
        Ok(Self {
            identifier: identifier.into(),
            options,
            connection: Arc::new(Mutex::new(FtpConnection {
                client: Some(client),
                pending_reply: false,
            })),
        })
    }

    /// Lock the session and make sure it is usable: drain a pending
    /// transfer reply, ping an idle connection, reconnect a dead one.
    async fn ready(&self) -> FsResult<OwnedMutexGuard<FtpConnection>> {
        let mut conn = self.connection.clone().lock_owned().await;

        if std::mem::take(&mut conn.pending_reply) {
            if let Some(client) = conn.client.as_mut() {
                if let Err(e) = client.finish_transfer().await {
                    debug!("{}: previous transfer ended with {}", self.identifier, e);
                }
            }
        }

        let healthy = match conn.client.as_mut() {
            Some(client) if client.is_broken() => false,
            Some(client) if client.idle_for() > STALE_AFTER => client.noop().await.is_ok(),
            Some(_) => true,
            None => false,
        };
        if !healthy {
            if let Some(stale) = conn.client.take() {
                debug!("{}: replacing stale FTP session", self.identifier);
                stale.quit().await;
            }
            conn.client = Some(FtpClient::connect(&self.options).await?);
        }
        Ok(conn)
    }

    fn to_item(&self, dir: &str, entry: ListingEntry) -> FsItem {
        let path = join_path('/', dir, &entry.name);
        let mut item = match entry.kind {
            EntryKind::Directory => FsItem::directory(entry.name, path),
            EntryKind::File | EntryKind::Symlink => FsItem::file(entry.name, path, entry.size),
        };
        if entry.kind == EntryKind::Symlink {
            item.is_symbolic_link = Some(true);
        }
        item.with_changed(entry.modified)
    }
}

async fn list_dir(client: &mut FtpClient, dir: &str) -> FsResult<Vec<ListingEntry>> {
    if !client.try_cwd(dir).await? {
        return Err(FsError::not_found("no such directory").with_path(dir));
    }
    client.list_cwd(dir).await
}

/// Resolve symlinked entries by checking whether the target is a directory.
async fn resolve_links(client: &mut FtpClient, items: &mut [FsItem]) -> FsResult<()> {
    for item in items.iter_mut().filter(|i| i.is_symlink()) {
        if client.try_cwd(&item.path).await? {
            item.is_directory = true;
            item.is_file = false;
            item.size = None;
        }
    }
    Ok(())
}

fn not_found(path: &str) -> FsError {
    FsError::not_found("no such file or directory").with_path(path)
}

/// Metadata for `path`; `NotFound` when it does not exist.
async fn stat_path(client: &mut FtpClient, path: &str) -> FsResult<Option<FsItem>> {
    let name = file_name('/', path).unwrap_or_else(|| "/".to_string());

    if let Some(entry) = client.mlst(path).await? {
        let item = match entry.kind {
            EntryKind::Directory => FsItem::directory(name, path),
            _ => FsItem::file(name, path, entry.size),
        };
        return Ok(Some(item.with_changed(entry.modified)));
    }

    if client.try_cwd(path).await? {
        return Ok(Some(FsItem::directory(name, path)));
    }
    match client.size(path).await {
        Ok(Some(size)) => {
            let changed = client.mdtm(path).await?;
            Ok(Some(FsItem::file(name, path, Some(size)).with_changed(changed)))
        }
        Ok(None) => Err(not_found(path)),
        Err(e) if e.kind == xfer_core::FsErrorKind::Unsupported => stat_via_parent(client, path).await,
        Err(e) => Err(e),
    }
}

/// Last resort for servers without `SIZE`/`MLST`: find the entry in its parent listing.
async fn stat_via_parent(client: &mut FtpClient, path: &str) -> FsResult<Option<FsItem>> {
    let parent = xfer_core::path::parent_path('/', path).unwrap_or_else(|| "/".to_string());
    let Some(name) = file_name('/', path) else {
        return Ok(None);
    };
    let entries = match list_dir(client, &parent).await {
        Ok(entries) => entries,
        Err(e) if e.is_not_found() => return Err(not_found(path)),
        Err(e) => return Err(e),
    };
    let entry = entries.into_iter().find(|e| e.name == name).ok_or_else(|| not_found(path))?;
    let item = match entry.kind {
        EntryKind::Directory => FsItem::directory(entry.name, path),
        _ => FsItem::file(entry.name, path, entry.size),
    };
    Ok(Some(item.with_changed(entry.modified)))
}

async fn check_is_file(client: &mut FtpClient, path: &str) -> FsResult<bool> {
    match client.mlst(path).await {
        Ok(Some(entry)) => return Ok(entry.kind != EntryKind::Directory),
        Ok(None) => {}
        Err(e) if e.is_not_found() => return Ok(false),
        Err(e) => return Err(e),
    }
    match client.size(path).await {
        Ok(found) => Ok(found.is_some()),
        Err(e) if e.kind == xfer_core::FsErrorKind::Unsupported => {
            match stat_via_parent(client, path).await {
                Ok(info) => Ok(info.is_some_and(|i| i.is_file)),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

#[async_trait]
impl FileSystemInterface for FtpInterface {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn list_entries(&self, dir: &str) -> FsResult<Vec<FsItem>> {
        let entries = with_client!(self, client => list_dir(client, dir))?;
        let mut items: Vec<FsItem> = entries.into_iter().map(|e| self.to_item(dir, e)).collect();
        if items.iter().any(FsItem::is_symlink) {
            with_client!(self, client => resolve_links(client, &mut items))?;
        }
        Ok(items)
    }

    async fn is_directory(&self, path: &str) -> FsResult<bool> {
        with_client!(self, client => client.try_cwd(path))
    }

    async fn is_file(&self, path: &str) -> FsResult<bool> {
        with_client!(self, client => check_is_file(client, path))
    }

    async fn exists(&self, path: &str) -> FsResult<bool> {
        match self.file_info(path).await {
            Ok(info) => Ok(info.is_some()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn file_info(&self, path: &str) -> FsResult<Option<FsItem>> {
        with_client!(self, client => stat_path(client, path))
    }

    async fn make_directory(&self, path: &str) -> FsResult<()> {
        with_client!(self, client => client.mkd(path))
    }

    async fn remove_file(&self, path: &str) -> FsResult<()> {
        with_client!(self, client => client.dele(path))
    }

    async fn remove_directory(&self, path: &str) -> FsResult<()> {
        // Breadth-first walk; removing in reverse order empties children first.
        let mut dirs = vec![path.to_string()];
        let mut next = 0;
        while next < dirs.len() {
            let dir = dirs[next].clone();
            next += 1;
            for item in self.list_entries(&dir).await? {
                if item.is_directory && !item.is_symlink() {
                    dirs.push(item.path);
                } else {
                    self.remove_file(&item.path).await?;
                }
            }
        }
        for dir in dirs.iter().rev() {
            with_client!(self, client => client.rmd(dir))?;
        }
        Ok(())
    }

    async fn create_read_stream(&self, path: &str) -> FsResult<ByteStream> {
        let mut retried = false;
        loop {
            let mut conn = self.ready().await?;
            let opened = conn.client()?.retr(path).await;
            match opened {
                Ok(data) => {
                    return Ok(Box::pin(FtpReadStream {
                        data,
                        conn,
                        path: path.to_string(),
                        received: 0,
                        progress: CoalescedLog::per_second(Level::Debug),
                    }))
                }
                Err(e) if e.is_connectivity() && !retried => retried = true,
                Err(e) => return Err(e),
            }
        }
    }

    async fn create_write_stream(&self, path: &str, size: Option<u64>) -> FsResult<Box<dyn ByteSink>> {
        let mut retried = false;
        loop {
            let mut conn = self.ready().await?;
            let client = conn.client()?;
            let timeout = client.data_timeout();
            let opened = client.stor(path).await;
            match opened {
                Ok(data) => {
                    return Ok(Box::new(FtpWriteSink {
                        data: Some(data),
                        conn,
                        path: path.to_string(),
                        size,
                        sent: 0,
                        timeout,
                        progress: CoalescedLog::per_second(Level::Debug),
                    }))
                }
                Err(e) if e.is_connectivity() && !retried => retried = true,
                Err(e) => return Err(e),
            }
        }
    }

    async fn destroy(&self) {
        let mut conn = self.connection.lock().await;
        conn.pending_reply = false;
        if let Some(client) = conn.client.take() {
            client.quit().await;
        }
    }
}

// ─── Read bridge ─────────────────────────────────────────────────────

struct FtpReadStream {
    // Declared first so the data socket closes before the session unlocks.
    data: DataStream,
    conn: OwnedMutexGuard<FtpConnection>,
    path: String,
    received: u64,
    progress: CoalescedLog,
}

impl AsyncRead for FtpReadStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        let polled = Pin::new(&mut this.data).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &polled {
            let n = (buf.filled().len() - before) as u64;
            this.received += n;
            if n > 0 {
                this.progress
                    .log(format!("RETR {}: {} bytes", this.path, this.received));
            }
        }
        polled
    }
}

impl Drop for FtpReadStream {
    fn drop(&mut self) {
        self.conn.pending_reply = true;
    }
}

// ─── Write bridge ────────────────────────────────────────────────────

struct FtpWriteSink {
    data: Option<DataStream>,
    conn: OwnedMutexGuard<FtpConnection>,
    path: String,
    size: Option<u64>,
    sent: u64,
    timeout: Duration,
    progress: CoalescedLog,
}

impl FtpWriteSink {
    fn data(&mut self) -> FsResult<&mut DataStream> {
        self.data
            .as_mut()
            .ok_or_else(|| FsError::disconnected("upload stream already closed").with_path(&self.path))
    }
}

impl Drop for FtpWriteSink {
    fn drop(&mut self) {
        if self.data.is_some() {
            self.conn.pending_reply = true;
        }
    }
}

#[async_trait]
impl ByteSink for FtpWriteSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> FsResult<()> {
        let limit = self.timeout;
        let data = self.data()?;
        with_timeout(limit, "upload chunk", async { data.write_all(&chunk).await.map_err(FsError::from) }).await?;
        self.sent += chunk.len() as u64;
        let line = match self.size {
            Some(total) => format!("STOR {}: {}/{} bytes", self.path, self.sent, total),
            None => format!("STOR {}: {} bytes", self.path, self.sent),
        };
        self.progress.log(line);
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> FsResult<()> {
        if let Some(mut data) = self.data.take() {
            let limit = self.timeout;
            let closed = with_timeout(limit, "upload close", async {
                data.flush().await?;
                data.shutdown().await.map_err(FsError::from)
            })
            .await;
            drop(data);
            if let Err(e) = closed {
                self.conn.pending_reply = true;
                return Err(e.or_path(&self.path));
            }
        }
        self.progress.flush();
        let path = self.path.clone();
        self.conn.client()?.finish_transfer().await.map_err(|e| e.or_path(&path))
    }

    async fn abort(mut self: Box<Self>) {
        drop(self.data.take());
        let path = self.path.clone();
        let Ok(client) = self.conn.client() else {
            return;
        };
        if let Err(e) = client.finish_transfer().await {
            debug!("aborted upload of {} closed with {}", path, e);
        }
        if let Err(e) = client.dele(&path).await {
            if !e.is_not_found() {
                warn!("could not remove partial upload {}: {}", path, e);
            }
        }
    }
}
