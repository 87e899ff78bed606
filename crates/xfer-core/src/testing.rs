//! Shared adapter contract scenario, run by every backend's test suite.

use crate::checksum::checksum_bytes;
use crate::error::{FsErrorKind, FsResult};
use crate::interface::{FileSystemInterface, WriteOptions};

const PAYLOAD: &str = "hello contract";

/// list → mkdir → write → checksum → remove, under `base`.
///
/// Panics on contract violations; backend failures are returned.
pub async fn run_contract_scenario(fs: &dyn FileSystemInterface, base: &str) -> FsResult<()> {
    let dir = fs.join_path(base, "contract-dir");
    let file = fs.join_path(&dir, "hello.txt");
    let missing = fs.join_path(&dir, "missing.txt");

    fs.create_directory(&dir).await?;
    fs.create_directory(&dir).await?;
    assert!(fs.is_directory(&dir).await?, "{} should be a directory", dir);

    let listing = fs.list(base).await?;
    let created: Vec<_> = listing.iter().filter(|i| i.name == "contract-dir").collect();
    assert_eq!(created.len(), 1, "directory listed exactly once");
    assert!(created[0].is_directory);

    let written = fs.write_file(&file, PAYLOAD.into(), WriteOptions::default()).await?;
    assert_eq!(written, PAYLOAD.len() as u64);
    assert!(fs.is_file(&file).await?);
    assert!(fs.exists(&file).await?);
    assert!(!fs.is_directory(&file).await?);

    let entries = fs.list(&dir).await?;
    assert!(entries[0].is_back_link(), "back-link leads a non-root listing");
    let hello = entries
        .iter()
        .find(|i| i.name == "hello.txt")
        .expect("written file is listed");
    assert!(hello.is_file);
    if let Some(size) = hello.size {
        assert_eq!(size, PAYLOAD.len() as u64);
    }

    let sums = fs.get_files_checksums(&[file.clone(), missing.clone()]).await?;
    assert_eq!(sums, vec![Some(checksum_bytes(PAYLOAD.as_bytes())), None]);

    let conflict = fs.create_directory(&file).await.unwrap_err();
    assert_eq!(conflict.kind, FsErrorKind::Conflict);
    let no_overwrite = fs
        .write_file(&file, "again".into(), WriteOptions::default())
        .await
        .unwrap_err();
    assert_eq!(no_overwrite.kind, FsErrorKind::Conflict);

    assert_eq!(fs.read_file(&file).await?.as_ref(), PAYLOAD.as_bytes());
    if let Some(info) = fs.file_info(&file).await? {
        assert!(info.is_file);
        assert_eq!(info.name, "hello.txt");
    }
    let absent = fs.file_info(&missing).await.unwrap_err();
    assert_eq!(absent.kind, FsErrorKind::NotFound, "file_info of a missing path");
    assert!(!fs.exists(&missing).await?);

    fs.remove(&dir).await?;
    assert!(!fs.exists(&dir).await?);
    let gone = fs.remove(&dir).await.unwrap_err();
    assert_eq!(gone.kind, FsErrorKind::NotFound);
    Ok(())
}
