use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use xfer_core::checksum::checksum_file_blocking;
use xfer_core::{ByteSink, ByteStream, FileSystemInterface, FsError, FsItem, FsResult};

/// Session over the local disk. Stateless apart from its identifier.
pub struct LocalInterface {
    identifier: String,
}

impl LocalInterface {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }
}

fn path_error(path: &str) -> impl FnOnce(io::Error) -> FsError + '_ {
    move |e| FsError::from(e).with_path(path)
}

fn changed_of(meta: &Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

fn item_from_metadata(name: String, path: String, meta: &Metadata, symlink: bool) -> FsItem {
    let mut item = if meta.is_dir() {
        FsItem::directory(name, path)
    } else {
        FsItem::file(name, path, Some(meta.len()))
    };
    item.changed = changed_of(meta);
    if symlink {
        item.is_symbolic_link = Some(true);
    }
    item
}

fn read_directory(dir: &Path) -> io::Result<Vec<FsItem>> {
    let mut items = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let entry_path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let link_meta = entry.metadata()?;
        let symlink = link_meta.file_type().is_symlink();
        // Broken links keep their own metadata.
        let meta = if symlink {
            std::fs::metadata(&entry_path).unwrap_or(link_meta)
        } else {
            link_meta
        };
        items.push(item_from_metadata(
            name,
            entry_path.to_string_lossy().to_string(),
            &meta,
            symlink,
        ));
    }
    Ok(items)
}

async fn probe(path: &str) -> FsResult<Option<Metadata>> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FsError::from(e).with_path(path)),
    }
}

#[async_trait]
impl FileSystemInterface for LocalInterface {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn path_separator(&self) -> char {
        std::path::MAIN_SEPARATOR
    }

    #[cfg(windows)]
    fn root_path(&self) -> String {
        std::env::var("SystemDrive")
            .map(|drive| format!("{}\\", drive))
            .unwrap_or_else(|_| "C:\\".to_string())
    }

    async fn list_entries(&self, dir: &str) -> FsResult<Vec<FsItem>> {
        let target = PathBuf::from(dir);
        tokio::task::spawn_blocking(move || read_directory(&target))
            .await?
            .map_err(path_error(dir))
    }

    async fn is_directory(&self, path: &str) -> FsResult<bool> {
        Ok(probe(path).await?.map_or(false, |m| m.is_dir()))
    }

    async fn is_file(&self, path: &str) -> FsResult<bool> {
        Ok(probe(path).await?.map_or(false, |m| m.is_file()))
    }

    async fn exists(&self, path: &str) -> FsResult<bool> {
        Ok(probe(path).await?.is_some())
    }

    async fn file_info(&self, path: &str) -> FsResult<Option<FsItem>> {
        let link_meta = fs::symlink_metadata(path).await.map_err(path_error(path))?;
        let symlink = link_meta.file_type().is_symlink();
        let meta = if symlink {
            fs::metadata(path).await.unwrap_or(link_meta)
        } else {
            link_meta
        };
        let name = self.file_name(path).unwrap_or_else(|| path.to_string());
        Ok(Some(item_from_metadata(name, path.to_string(), &meta, symlink)))
    }

    async fn make_directory(&self, path: &str) -> FsResult<()> {
        fs::create_dir(path).await.map_err(path_error(path))
    }

    async fn remove_file(&self, path: &str) -> FsResult<()> {
        fs::remove_file(path).await.map_err(path_error(path))
    }

    async fn remove_directory(&self, path: &str) -> FsResult<()> {
        fs::remove_dir_all(path).await.map_err(path_error(path))
    }

    async fn create_read_stream(&self, path: &str) -> FsResult<ByteStream> {
        let file = File::open(path).await.map_err(path_error(path))?;
        Ok(Box::pin(file))
    }

    async fn create_write_stream(&self, path: &str, _size: Option<u64>) -> FsResult<Box<dyn ByteSink>> {
        let file = File::create(path).await.map_err(path_error(path))?;
        Ok(Box::new(LocalSink {
            file,
            path: PathBuf::from(path),
        }))
    }

    async fn get_files_checksums(&self, files: &[String]) -> FsResult<Vec<Option<String>>> {
        let mut sums = Vec::with_capacity(files.len());
        for file in files {
            let target = PathBuf::from(file);
            let digest = tokio::task::spawn_blocking(move || checksum_file_blocking(&target)).await?;
            match digest {
                Ok(sum) => sums.push(Some(sum)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => sums.push(None),
                Err(e) => return Err(FsError::from(e).with_path(file.as_str())),
            }
        }
        Ok(sums)
    }
}

/// Write side of a local transfer. Aborting deletes the partial file.
struct LocalSink {
    file: File,
    path: PathBuf,
}

#[async_trait]
impl ByteSink for LocalSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> FsResult<()> {
        self.file.write_all(&chunk).await?;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> FsResult<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }

    async fn abort(self: Box<Self>) {
        let LocalSink { file, path } = *self;
        drop(file);
        if let Err(e) = fs::remove_file(&path).await {
            log::warn!("could not remove partial file {}: {}", path.display(), e);
        }
    }
}
