//! SFTP session exposed as a [`FileSystemInterface`].
//!
//! `ssh2` is blocking, so every call runs on the blocking pool while
//! holding the session lock. Streams bridge to async code through bounded
//! channels fed by a dedicated blocking task.

use crate::sftp::session::{map_ssh_error, stat_is_dir, stat_is_symlink, SftpSession};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, warn, Level};
use ssh2::FileStat;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use xfer_core::path::join_path;
use xfer_core::{ByteSink, ByteStream, CoalescedLog, FileSystemInterface, FsError, FsItem, FsResult, FtpOptions};

const STALE_AFTER: Duration = Duration::from_secs(15);
const CHUNK_SIZE: usize = 64 * 1024;
const QUEUE_DEPTH: usize = 8;
const DIR_MODE: i32 = 0o755;

type SharedSession = Arc<Mutex<Option<SftpSession>>>;

/// Make the locked slot hold a live session.
fn ensure<'a>(slot: &'a mut MutexGuard<'_, Option<SftpSession>>, options: &FtpOptions) -> FsResult<&'a mut SftpSession> {
    let alive = match slot.as_mut() {
        Some(session) if session.idle_for() > STALE_AFTER => session.probe(),
        Some(_) => true,
        None => false,
    };
    if !alive {
        if let Some(stale) = slot.take() {
            debug!("replacing stale SFTP session");
            stale.disconnect();
        }
        **slot = Some(SftpSession::connect(options)?);
    }
    slot.as_mut()
        .ok_or_else(|| FsError::disconnected("SFTP session is not connected"))
}

fn lock(shared: &SharedSession) -> MutexGuard<'_, Option<SftpSession>> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

fn mtime(stat: &FileStat) -> Option<DateTime<Utc>> {
    stat.mtime
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

fn item_from_stat(name: String, path: String, stat: &FileStat) -> FsItem {
    let item = if stat_is_dir(stat) {
        FsItem::directory(name, path)
    } else {
        FsItem::file(name, path, stat.size)
    };
    item.with_changed(mtime(stat))
}

pub struct SftpInterface {
    identifier: String,
    options: Arc<FtpOptions>,
    session: SharedSession,
}

impl SftpInterface {
    pub async fn connect(identifier: impl Into<String>, options: FtpOptions) -> FsResult<Self> {
        let options = Arc::new(options);
        let session = {
            let options = options.clone();
            tokio::task::spawn_blocking(move || SftpSession::connect(&options)).await??
        };
        Ok(Self {
            identifier: identifier.into(),
            options,
            session: Arc::new(Mutex::new(Some(session))),
        })
    }

    /// Remote home directory reported at login.
    pub async fn home(&self) -> FsResult<Option<String>> {
        self.blocking(|session| Ok(session.home().map(str::to_string))).await
    }

    /// Run `f` on the blocking pool with a live session, reconnecting once
    /// when the session turns out to be dead.
    async fn blocking<T, F>(&self, f: F) -> FsResult<T>
    where
        T: Send + 'static,
        F: Fn(&mut SftpSession) -> FsResult<T> + Send + 'static,
    {
        let shared = self.session.clone();
        let options = self.options.clone();
        let identifier = self.identifier.clone();
        tokio::task::spawn_blocking(move || {
            let mut slot = lock(&shared);
            let mut retried = false;
            loop {
                let session = ensure(&mut slot, &options)?;
                match f(session) {
                    Err(e) if e.is_connectivity() => {
                        if let Some(dead) = slot.take() {
                            dead.disconnect();
                        }
                        if retried {
                            return Err(e);
                        }
                        debug!("{}: {}; reconnecting", identifier, e);
                        retried = true;
                    }
                    other => return other,
                }
            }
        })
        .await?
    }
}

fn stat_opt(session: &mut SftpSession, path: &str) -> FsResult<Option<FileStat>> {
    match session.sftp().stat(Path::new(path)) {
        Ok(stat) => Ok(Some(stat)),
        Err(e) => {
            let err = map_ssh_error(e, Some(path));
            if err.is_not_found() {
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}

fn read_dir(session: &mut SftpSession, dir: &str) -> FsResult<Vec<FsItem>> {
    let sftp = session.sftp();
    let entries = sftp.readdir(Path::new(dir)).map_err(|e| map_ssh_error(e, Some(dir)))?;
    let mut items = Vec::with_capacity(entries.len());
    for (entry_path, stat) in entries {
        let Some(name) = entry_path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if name == "." || name == ".." {
            continue;
        }
        let path = join_path('/', dir, &name);
        let is_link = stat_is_symlink(&stat);
        // Follow links; dangling ones keep their own attributes.
        let stat = if is_link {
            sftp.stat(Path::new(&path)).unwrap_or(stat)
        } else {
            stat
        };
        let mut item = item_from_stat(name, path, &stat);
        if is_link {
            item.is_symbolic_link = Some(true);
        }
        items.push(item);
    }
    Ok(items)
}

fn remove_tree(session: &mut SftpSession, root: &str) -> FsResult<()> {
    let mut dirs = vec![root.to_string()];
    let mut next = 0;
    while next < dirs.len() {
        let dir = dirs[next].clone();
        next += 1;
        for item in read_dir(session, &dir)? {
            if item.is_directory && !item.is_symlink() {
                dirs.push(item.path);
            } else {
                session
                    .sftp()
                    .unlink(Path::new(&item.path))
                    .map_err(|e| map_ssh_error(e, Some(&item.path)))?;
            }
        }
    }
    for dir in dirs.iter().rev() {
        session
            .sftp()
            .rmdir(Path::new(dir))
            .map_err(|e| map_ssh_error(e, Some(dir)))?;
    }
    Ok(())
}

#[async_trait]
impl FileSystemInterface for SftpInterface {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn list_entries(&self, dir: &str) -> FsResult<Vec<FsItem>> {
        let dir = dir.to_string();
        self.blocking(move |session| read_dir(session, &dir)).await
    }

    async fn is_directory(&self, path: &str) -> FsResult<bool> {
        let path = path.to_string();
        self.blocking(move |session| Ok(stat_opt(session, &path)?.is_some_and(|s| stat_is_dir(&s))))
            .await
    }

    async fn is_file(&self, path: &str) -> FsResult<bool> {
        let path = path.to_string();
        self.blocking(move |session| Ok(stat_opt(session, &path)?.is_some_and(|s| !stat_is_dir(&s))))
            .await
    }

    async fn exists(&self, path: &str) -> FsResult<bool> {
        let path = path.to_string();
        self.blocking(move |session| Ok(stat_opt(session, &path)?.is_some())).await
    }

    async fn file_info(&self, path: &str) -> FsResult<Option<FsItem>> {
        let path = path.to_string();
        self.blocking(move |session| {
            let Some(stat) = stat_opt(session, &path)? else {
                return Err(FsError::not_found("no such file or directory").with_path(&path));
            };
            let name = xfer_core::path::file_name('/', &path).unwrap_or_else(|| "/".to_string());
            let mut item = item_from_stat(name, path.clone(), &stat);
            if let Ok(lstat) = session.sftp().lstat(Path::new(&path)) {
                if stat_is_symlink(&lstat) {
                    item.is_symbolic_link = Some(true);
                }
            }
            Ok(Some(item))
        })
        .await
    }

    async fn make_directory(&self, path: &str) -> FsResult<()> {
        let path = path.to_string();
        self.blocking(move |session| {
            session
                .sftp()
                .mkdir(Path::new(&path), DIR_MODE)
                .map_err(|e| map_ssh_error(e, Some(&path)))
        })
        .await
    }

    async fn remove_file(&self, path: &str) -> FsResult<()> {
        let path = path.to_string();
        self.blocking(move |session| {
            session
                .sftp()
                .unlink(Path::new(&path))
                .map_err(|e| map_ssh_error(e, Some(&path)))
        })
        .await
    }

    async fn remove_directory(&self, path: &str) -> FsResult<()> {
        let path = path.to_string();
        self.blocking(move |session| remove_tree(session, &path)).await
    }

    async fn create_read_stream(&self, path: &str) -> FsResult<ByteStream> {
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(QUEUE_DEPTH);
        let (opened_tx, opened_rx) = oneshot::channel::<FsResult<()>>();
        let shared = self.session.clone();
        let options = self.options.clone();
        let path = path.to_string();

        tokio::task::spawn_blocking(move || {
            let mut slot = lock(&shared);
            let opened = ensure(&mut slot, &options)
                .and_then(|session| session.sftp().open(Path::new(&path)).map_err(|e| map_ssh_error(e, Some(&path))));
            let mut file = match opened {
                Ok(file) => {
                    let _ = opened_tx.send(Ok(()));
                    file
                }
                Err(e) => {
                    if e.is_connectivity() {
                        slot.take();
                    }
                    let _ = opened_tx.send(Err(e));
                    return;
                }
            };

            let mut progress = CoalescedLog::per_second(Level::Debug);
            let mut received = 0u64;
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                match file.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        received += n as u64;
                        progress.log(format!("SFTP read {}: {} bytes", path, received));
                        if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                            debug!("SFTP read of {} abandoned by the consumer", path);
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        break;
                    }
                }
            }
        });

        opened_rx
            .await
            .map_err(|_| FsError::disconnected("SFTP reader exited before opening the file"))??;
        Ok(Box::pin(StreamReader::new(ReceiverStream::new(rx))))
    }

    async fn create_write_stream(&self, path: &str, size: Option<u64>) -> FsResult<Box<dyn ByteSink>> {
        let (tx, mut rx) = mpsc::channel::<Bytes>(QUEUE_DEPTH);
        let (opened_tx, opened_rx) = oneshot::channel::<FsResult<()>>();
        let aborted = Arc::new(AtomicBool::new(false));
        let shared = self.session.clone();
        let options = self.options.clone();
        let target = path.to_string();
        let abort_flag = aborted.clone();

        let writer = tokio::task::spawn_blocking(move || -> FsResult<()> {
            let mut slot = lock(&shared);
            let opened = ensure(&mut slot, &options)
                .and_then(|session| session.sftp().create(Path::new(&target)).map_err(|e| map_ssh_error(e, Some(&target))));
            let mut file = match opened {
                Ok(file) => {
                    let _ = opened_tx.send(Ok(()));
                    file
                }
                Err(e) => {
                    if e.is_connectivity() {
                        slot.take();
                    }
                    let _ = opened_tx.send(Err(e.clone()));
                    return Err(e);
                }
            };

            let mut progress = CoalescedLog::per_second(Level::Debug);
            let mut written = 0u64;
            while let Some(chunk) = rx.blocking_recv() {
                if let Err(e) = file.write_all(&chunk) {
                    let err = FsError::from(e).with_path(&target);
                    if err.is_connectivity() {
                        drop(file);
                        slot.take();
                    }
                    return Err(err);
                }
                written += chunk.len() as u64;
                let line = match size {
                    Some(total) => format!("SFTP write {}: {}/{} bytes", target, written, total),
                    None => format!("SFTP write {}: {} bytes", target, written),
                };
                progress.log(line);
            }
            drop(file);

            if abort_flag.load(Ordering::SeqCst) {
                if let Some(session) = slot.as_mut() {
                    if let Err(e) = session.sftp().unlink(Path::new(&target)) {
                        warn!("could not remove partial upload {}: {}", target, e);
                    }
                }
                return Err(FsError::aborted("transfer aborted").with_path(&target));
            }
            Ok(())
        });

        match opened_rx.await {
            Ok(Ok(())) => Ok(Box::new(SftpWriteSink {
                tx: Some(tx),
                writer: Some(writer),
                aborted,
            })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(writer.await?.err().unwrap_or_else(|| FsError::disconnected("SFTP writer exited"))),
        }
    }

    async fn destroy(&self) {
        let shared = self.session.clone();
        let closed = tokio::task::spawn_blocking(move || {
            if let Some(session) = lock(&shared).take() {
                session.disconnect();
            }
        })
        .await;
        if let Err(e) = closed {
            warn!("{}: SFTP shutdown failed: {}", self.identifier, e);
        }
    }
}

// ─── Write bridge ────────────────────────────────────────────────────

struct SftpWriteSink {
    tx: Option<mpsc::Sender<Bytes>>,
    writer: Option<JoinHandle<FsResult<()>>>,
    aborted: Arc<AtomicBool>,
}

impl SftpWriteSink {
    async fn join(&mut self) -> FsResult<()> {
        self.tx.take();
        match self.writer.take() {
            Some(writer) => writer.await?,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ByteSink for SftpWriteSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> FsResult<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(FsError::disconnected("upload stream already closed"));
        };
        if tx.send(chunk).await.is_err() {
            // The writer stopped early; its result says why.
            self.join().await?;
            return Err(FsError::disconnected("SFTP writer stopped"));
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> FsResult<()> {
        self.join().await
    }

    async fn abort(mut self: Box<Self>) {
        self.aborted.store(true, Ordering::SeqCst);
        if let Err(e) = self.join().await {
            debug!("aborted SFTP upload: {}", e);
        }
    }
}
