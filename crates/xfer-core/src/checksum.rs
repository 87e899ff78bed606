//! Streaming xxh64 digests used for post-write verification.

use crate::error::FsResult;
use std::io::Read;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};
use xxhash_rust::xxh64::{xxh64, Xxh64};

/// Files are hashed in chunks of this size and never fully buffered.
pub const CHECKSUM_CHUNK_SIZE: usize = 1024 * 1024;

const SEED: u64 = 0;

pub fn format_digest(digest: u64) -> String {
    format!("{:016x}", digest)
}

pub fn checksum_bytes(data: &[u8]) -> String {
    format_digest(xxh64(data, SEED))
}

pub async fn checksum_reader<R>(mut reader: R) -> FsResult<String>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Xxh64::new(SEED);
    let mut buf = vec![0u8; CHECKSUM_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format_digest(hasher.digest()))
}

/// Blocking variant for callers already on a blocking thread.
pub fn checksum_file_blocking(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Xxh64::new(SEED);
    let mut buf = vec![0u8; CHECKSUM_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format_digest(hasher.digest()))
}
