//! The capability contract every live backend session implements.

use crate::checksum::checksum_reader;
use crate::error::{FsError, FsResult};
use crate::path;
use crate::types::{sort_items, FsItem};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

/// Readable side of a transfer.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// `(transferred, total)`; total is `None` when the size is unknown.
pub type ProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Size of the chunks `pump` moves from source to sink.
pub const PUMP_CHUNK_SIZE: usize = 64 * 1024;

// ─── Write plumbing ──────────────────────────────────────────────────

/// Writable side of a transfer.
///
/// A sink must be consumed by exactly one of `finish` or `abort`; dropping
/// it without either leaves the destination in a backend-defined state.
#[async_trait]
pub trait ByteSink: Send {
    async fn write_chunk(&mut self, chunk: Bytes) -> FsResult<()>;

    /// Flush and commit the written bytes.
    async fn finish(self: Box<Self>) -> FsResult<()>;

    /// Release the destination without committing.
    async fn abort(self: Box<Self>);
}

pub enum WriteSource {
    Bytes(Bytes),
    Text(String),
    Stream(ByteStream),
}

impl From<&str> for WriteSource {
    fn from(s: &str) -> Self {
        WriteSource::Text(s.to_string())
    }
}

impl From<String> for WriteSource {
    fn from(s: String) -> Self {
        WriteSource::Text(s)
    }
}

impl From<Vec<u8>> for WriteSource {
    fn from(v: Vec<u8>) -> Self {
        WriteSource::Bytes(Bytes::from(v))
    }
}

impl From<Bytes> for WriteSource {
    fn from(b: Bytes) -> Self {
        WriteSource::Bytes(b)
    }
}

#[derive(Clone, Default)]
pub struct WriteOptions {
    pub size: Option<u64>,
    pub overwrite: bool,
    pub progress: Option<ProgressCallback>,
    pub abort: Option<CancellationToken>,
}

impl WriteOptions {
    pub fn overwrite() -> Self {
        Self {
            overwrite: true,
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_abort(mut self, token: CancellationToken) -> Self {
        self.abort = Some(token);
        self
    }
}

impl fmt::Debug for WriteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOptions")
            .field("size", &self.size)
            .field("overwrite", &self.overwrite)
            .field("progress", &self.progress.is_some())
            .field("abort", &self.abort.is_some())
            .finish()
    }
}

/// Drive `reader` into `sink` until EOF, the abort token fires, or either
/// side fails. The sink is aborted on every failure path.
pub async fn pump(
    mut reader: ByteStream,
    mut sink: Box<dyn ByteSink>,
    options: &WriteOptions,
) -> FsResult<u64> {
    let token = options.abort.clone().unwrap_or_default();
    let report = |transferred: u64| {
        if let Some(cb) = &options.progress {
            cb(transferred, options.size);
        }
    };
    let mut buf = vec![0u8; PUMP_CHUNK_SIZE];
    let mut transferred = 0u64;
    report(0);

    loop {
        let read = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            r = reader.read(&mut buf) => Some(r),
        };
        let n = match read {
            None => {
                sink.abort().await;
                return Err(FsError::aborted("transfer aborted"));
            }
            Some(Err(e)) => {
                sink.abort().await;
                return Err(e.into());
            }
            Some(Ok(0)) => break,
            Some(Ok(n)) => n,
        };

        let chunk = Bytes::copy_from_slice(&buf[..n]);
        let written = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            r = sink.write_chunk(chunk) => Some(r),
        };
        match written {
            None => {
                sink.abort().await;
                return Err(FsError::aborted("transfer aborted"));
            }
            Some(Err(e)) => {
                sink.abort().await;
                return Err(e);
            }
            Some(Ok(())) => {}
        }
        transferred += n as u64;
        report(transferred);
    }

    if token.is_cancelled() {
        sink.abort().await;
        return Err(FsError::aborted("transfer aborted"));
    }
    sink.finish().await?;
    Ok(transferred)
}

// ─── Interface ───────────────────────────────────────────────────────

#[async_trait]
pub trait FileSystemInterface: Send + Sync {
    /// Identifier of the adapter that created this session.
    fn identifier(&self) -> &str;

    fn path_separator(&self) -> char {
        '/'
    }

    fn root_path(&self) -> String {
        self.path_separator().to_string()
    }

    // ── Path algebra ─────────────────────────────────────────────

    fn join_path(&self, base: &str, name: &str) -> String {
        path::join_path(self.path_separator(), base, name)
    }

    fn path_components(&self, p: &str) -> Vec<String> {
        path::path_components(self.path_separator(), p)
    }

    fn relative_path(&self, from: &str, to: &str) -> String {
        path::relative_path(self.path_separator(), from, to)
    }

    fn relative_path_components(&self, from: &str, to: &str) -> Vec<String> {
        path::relative_path_components(self.path_separator(), from, to)
    }

    fn parent_path(&self, p: &str) -> Option<String> {
        path::parent_path(self.path_separator(), p)
    }

    fn is_root(&self, p: &str) -> bool {
        path::is_root(self.path_separator(), p)
    }

    fn file_name(&self, p: &str) -> Option<String> {
        path::file_name(self.path_separator(), p)
    }

    // ── Listing and probes ───────────────────────────────────────

    /// Raw directory entries, without the back-link.
    async fn list_entries(&self, dir: &str) -> FsResult<Vec<FsItem>>;

    /// Sorted entries, led by a back-link unless `dir` is the root.
    async fn list(&self, dir: &str) -> FsResult<Vec<FsItem>> {
        let mut items = self.list_entries(dir).await.map_err(|e| e.or_path(dir))?;
        sort_items(&mut items);
        if let Some(parent) = self.parent_path(dir) {
            items.insert(0, FsItem::back_link(parent));
        }
        Ok(items)
    }

    async fn is_directory(&self, path: &str) -> FsResult<bool>;

    async fn is_file(&self, path: &str) -> FsResult<bool>;

    async fn exists(&self, path: &str) -> FsResult<bool>;

    /// `Ok(None)` means the metadata is indeterminate, not that the path is absent.
    async fn file_info(&self, path: &str) -> FsResult<Option<FsItem>>;

    // ── Mutation ─────────────────────────────────────────────────

    /// Create exactly one directory whose parent exists.
    async fn make_directory(&self, path: &str) -> FsResult<()>;

    /// Idempotent when `path` is already a directory; conflict when a file is there.
    async fn create_directory(&self, path: &str) -> FsResult<()> {
        if self.is_directory(path).await? {
            return Ok(());
        }
        if self.exists(path).await? {
            return Err(FsError::conflict("a file occupies the directory path").with_path(path));
        }
        match self.make_directory(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind == crate::FsErrorKind::Conflict => {
                if self.is_directory(path).await.unwrap_or(false) {
                    Ok(())
                } else {
                    Err(e.or_path(path))
                }
            }
            Err(e) => Err(e.or_path(path)),
        }
    }

    async fn remove_file(&self, path: &str) -> FsResult<()>;

    /// Removes the directory and everything below it.
    async fn remove_directory(&self, path: &str) -> FsResult<()>;

    async fn remove(&self, path: &str) -> FsResult<()> {
        if self.is_directory(path).await? {
            return self.remove_directory(path).await;
        }
        if !self.exists(path).await? {
            return Err(FsError::not_found("nothing to remove").with_path(path));
        }
        self.remove_file(path).await
    }

    // ── Byte streams ─────────────────────────────────────────────

    async fn create_read_stream(&self, path: &str) -> FsResult<ByteStream>;

    async fn create_write_stream(&self, path: &str, size: Option<u64>) -> FsResult<Box<dyn ByteSink>>;

    async fn read_file(&self, path: &str) -> FsResult<Bytes> {
        let mut reader = self.create_read_stream(path).await?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| FsError::from(e).or_path(path))?;
        Ok(Bytes::from(buf))
    }

    /// Pump `source` into `path`, returning the number of bytes written.
    async fn write_file(&self, path: &str, source: WriteSource, options: WriteOptions) -> FsResult<u64> {
        if !options.overwrite && self.exists(path).await? {
            return Err(FsError::conflict("destination already exists").with_path(path));
        }
        let (reader, size): (ByteStream, Option<u64>) = match source {
            WriteSource::Bytes(b) => {
                let len = b.len() as u64;
                (Box::pin(Cursor::new(b)), Some(len))
            }
            WriteSource::Text(t) => {
                let len = t.len() as u64;
                (Box::pin(Cursor::new(t.into_bytes())), Some(len))
            }
            WriteSource::Stream(s) => (s, options.size),
        };
        let options = WriteOptions { size, ..options };
        let sink = self.create_write_stream(path, size).await?;
        pump(reader, sink, &options).await.map_err(|e| e.or_path(path))
    }

    /// One digest per file, `None` for files that do not exist.
    async fn get_files_checksums(&self, files: &[String]) -> FsResult<Vec<Option<String>>> {
        let mut sums = Vec::with_capacity(files.len());
        for file in files {
            match self.create_read_stream(file).await {
                Ok(reader) => sums.push(Some(checksum_reader(reader).await.map_err(|e| e.or_path(file))?)),
                Err(e) if e.is_not_found() => sums.push(None),
                Err(e) => return Err(e),
            }
        }
        Ok(sums)
    }

    /// Release sockets, handles and open streams.
    async fn destroy(&self) {}
}
