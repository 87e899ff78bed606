//! Persisted recovery state: one directory per operation uuid holding
//! `info.json` and an append-only `completed` log.

use crate::error::{OpResult, OperationError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const INFO_FILE: &str = "info.json";
const COMPLETED_FILE: &str = "completed";

pub const INFO_VERSION: u32 = 1;

fn default_version() -> u32 {
    INFO_VERSION
}

/// One flattened entry of a copy or move.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CopyMoveElementInfo {
    pub name: String,
    pub from: String,
    /// Directories carry a trailing separator.
    pub to: String,
    pub is_directory: bool,
    pub is_file: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferInfo {
    #[serde(default = "default_version")]
    pub version: u32,
    pub source: String,
    pub destination: String,
    pub elements: Vec<String>,
    pub destination_path: String,
    pub list: Vec<CopyMoveElementInfo>,
    #[serde(default)]
    pub direct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryInfo {
    #[serde(default = "default_version")]
    pub version: u32,
    pub source: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoveInfo {
    #[serde(default = "default_version")]
    pub version: u32,
    pub source: String,
    pub elements: Vec<String>,
}

/// Contents of `info.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OperationInfo {
    Copy(TransferInfo),
    Move(TransferInfo),
    Directory(DirectoryInfo),
    Remove(RemoveInfo),
}

#[derive(Debug, Clone)]
pub struct OperationStore {
    root: PathBuf,
}

impl OperationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn directory(&self, uuid: Uuid) -> PathBuf {
        self.root.join(uuid.to_string())
    }

    pub async fn save_info(&self, uuid: Uuid, info: &OperationInfo) -> OpResult<()> {
        let dir = self.directory(uuid);
        fs::create_dir_all(&dir).await?;
        let json = serde_json::to_vec_pretty(info)?;
        fs::write(dir.join(INFO_FILE), json).await?;
        debug!("saved operation info {}", uuid);
        Ok(())
    }

    /// Append one finished key and sync it before returning.
    pub async fn append_completed(&self, uuid: Uuid, key: &str) -> OpResult<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.directory(uuid).join(COMPLETED_FILE))
            .await?;
        file.write_all(format!("{}\n", key).as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    pub async fn read_info(&self, uuid: Uuid) -> OpResult<OperationInfo> {
        let path = self.directory(uuid).join(INFO_FILE);
        let raw = fs::read(&path)
            .await
            .map_err(|e| OperationError::Persistence(format!("{}: {}", path.display(), e)))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Finished keys; a missing log means nothing finished yet.
    pub async fn read_completed(&self, uuid: Uuid) -> OpResult<HashSet<String>> {
        let raw = match fs::read_to_string(self.directory(uuid).join(COMPLETED_FILE)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn load(&self, uuid: Uuid) -> OpResult<(OperationInfo, HashSet<String>)> {
        Ok((self.read_info(uuid).await?, self.read_completed(uuid).await?))
    }

    pub async fn remove(&self, uuid: Uuid) -> OpResult<()> {
        match fs::remove_dir_all(self.directory(uuid)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Uuids of directories holding an `info.json`.
    pub async fn list(&self) -> OpResult<Vec<Uuid>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(uuid) = Uuid::parse_str(&name) else {
                continue;
            };
            if fs::metadata(entry.path().join(INFO_FILE)).await.is_ok() {
                found.push(uuid);
            } else {
                warn!("ignoring operation directory {} without {}", name, INFO_FILE);
            }
        }
        found.sort();
        Ok(found)
    }
}
